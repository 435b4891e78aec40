// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::{self, Debug, Formatter},
    time::Duration,
};

use cairn_store::{Error, Message, MessageStream, Procedure, ProcedureHandle, RemoteStore, Reply, Result, Ttl};
use futures::StreamExt;
use recoverable::{Recovery, RecoveryKind};
use redis::{Client, Value, aio::ConnectionManager};
use tick::Clock;

use crate::{ConnectOptions, convert};

/// A [`RemoteStore`] backed by one Redis endpoint.
///
/// Cloning is cheap; clones share the multiplexed command connection.
#[derive(Clone)]
pub struct RedisStore {
    url: String,
    client: Client,
    connection: ConnectionManager,
}

impl Debug for RedisStore {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the endpoint at `url` with the default [`ConnectOptions`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed url, or the last transport error
    /// once every attempt has failed.
    pub async fn connect(url: &str, clock: &Clock) -> Result<Self> {
        Self::connect_with(url, clock, &ConnectOptions::default()).await
    }

    /// Connects to the endpoint at `url`, retrying transport failures with doubling delays.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed url, or the last transport error
    /// once `options.attempts` attempts have failed.
    pub async fn connect_with(url: &str, clock: &Clock, options: &ConnectOptions) -> Result<Self> {
        let client = Client::open(url).map_err(Error::configuration)?;
        let mut delay = options.initial_delay;
        let mut attempt = 1;

        loop {
            match ConnectionManager::new(client.clone()).await.map_err(convert::error) {
                Ok(connection) => {
                    tracing::info!(store.url = %url, store.attempt = attempt, "store.connected");
                    return Ok(Self {
                        url: url.to_owned(),
                        client,
                        connection,
                    });
                }
                Err(error) if attempt < options.attempts && error.recovery().kind() == RecoveryKind::Retry => {
                    tracing::warn!(
                        store.url = %url,
                        store.attempt = attempt,
                        store.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "store.connect_failed"
                    );
                    clock.delay(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Returns the url this store is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: Value = cmd.query_async(&mut self.connection()).await.map_err(convert::error)?;
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let remaining: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        convert::ttl(remaining)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let found: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(found)
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
        let previous: bool = redis::cmd("SETBIT")
            .arg(key)
            .arg(offset)
            .arg(u8::from(value))
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(previous)
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        let bit: bool = redis::cmd("GETBIT")
            .arg(key)
            .arg(offset)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(bit)
    }

    async fn bit_count(&self, key: &str) -> Result<u64> {
        let count: u64 = redis::cmd("BITCOUNT")
            .arg(key)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(count)
    }

    async fn load_procedure(&self, procedure: &Procedure) -> Result<ProcedureHandle> {
        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(procedure.source())
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(ProcedureHandle::new(procedure, digest))
    }

    async fn eval_procedure(&self, handle: &ProcedureHandle, keys: &[&str], args: &[String]) -> Result<Reply> {
        let value: Value = redis::cmd("EVALSHA")
            .arg(handle.digest())
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        convert::reply(value)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut self.connection())
            .await
            .map_err(convert::error)?;
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(convert::error)?;
        for channel in channels {
            pubsub.subscribe(channel).await.map_err(convert::error)?;
        }

        let url = self.url.clone();
        let messages = pubsub.into_on_message().filter_map(move |message| {
            let decoded = message.get_payload::<String>();
            let channel = message.get_channel_name().to_owned();
            let url = url.clone();
            async move {
                match decoded {
                    Ok(payload) => Some(Message { channel, payload }),
                    Err(error) => {
                        tracing::warn!(store.url = %url, store.channel = %channel, error = %error, "store.payload_dropped");
                        None
                    }
                }
            }
        });
        Ok(messages.boxed())
    }
}
