// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for far-tier store backends.

use std::time::Duration;

use futures::stream::BoxStream;

use crate::{Procedure, ProcedureHandle, Reply, Result, Ttl};

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The channel the message was published on.
    pub channel: String,
    /// The UTF-8 payload.
    pub payload: String,
}

impl Message {
    /// Creates a new message.
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages for one subscription connection.
///
/// The stream ends when the underlying connection is lost. Subscribers are expected to
/// subscribe again, which is how reconnects surface through this boundary.
pub type MessageStream = BoxStream<'static, Message>;

/// Trait for shared key-value store endpoints.
///
/// One implementation instance talks to one endpoint (a primary or a replica). Every
/// method is a single request/response round trip; implementations may retry connection
/// establishment internally but never replay a command that may have been applied.
///
/// Keys and channels are UTF-8; values are opaque bytes.
pub trait RemoteStore: Send + Sync {
    /// Reads the value stored at `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Stores `value` at `key`, expiring after `ttl` when given.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the given keys and returns how many existed.
    fn del(&self, keys: &[&str]) -> impl Future<Output = Result<u64>> + Send;

    /// Sets the time-to-live of `key`. Returns `false` when the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send;

    /// Returns the remaining time-to-live of `key`, telling a missing key apart from one without expiry.
    fn ttl(&self, key: &str) -> impl Future<Output = Result<Ttl>> + Send;

    /// Returns `true` if `key` exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Sets the bit at `offset` and returns its previous value.
    fn set_bit(&self, key: &str, offset: u64, value: bool) -> impl Future<Output = Result<bool>> + Send;

    /// Reads the bit at `offset`.
    fn get_bit(&self, key: &str, offset: u64) -> impl Future<Output = Result<bool>> + Send;

    /// Counts the set bits of the value at `key`.
    fn bit_count(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Installs a procedure and returns a handle to invoke it with.
    ///
    /// Installing the same procedure twice is harmless.
    fn load_procedure(&self, procedure: &Procedure) -> impl Future<Output = Result<ProcedureHandle>> + Send;

    /// Runs an installed procedure atomically.
    ///
    /// Fails with [`ErrorKind::ProcedureMissing`](crate::ErrorKind::ProcedureMissing) when
    /// the endpoint has forgotten the procedure, for example after a restart.
    fn eval_procedure(&self, handle: &ProcedureHandle, keys: &[&str], args: &[String]) -> impl Future<Output = Result<Reply>> + Send;

    /// Publishes `payload` on `channel` and returns the number of receivers.
    fn publish(&self, channel: &str, payload: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Opens a subscription connection for the given channels.
    fn subscribe(&self, channels: &[String]) -> impl Future<Output = Result<MessageStream>> + Send;
}
