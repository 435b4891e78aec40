// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation for testing.
//!
//! This module provides [`InMemoryStore`], a process-local fake of a shared store
//! endpoint. It implements the full [`RemoteStore`] boundary, runs the
//! [procedure catalog](crate::procedure) natively with the same argument conventions as
//! the Lua sources, records every operation and supports failure injection, lost
//! procedures and dropped subscription connections.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{StreamExt, channel::mpsc};
use parking_lot::Mutex;
use tick::Clock;

use crate::{
    Error, Message, MessageStream, Procedure, ProcedureHandle, RemoteStore, Reply, Result, Ttl,
    procedure::{BLOOM_ADD, BLOOM_CHECK, RATE_LIMIT_INCREMENT, STATS_READ, STATS_RECORD},
};

/// Recorded store operation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A `get` of the given key.
    Get(String),
    /// A `set` of the given key.
    Set(String),
    /// A `del` of the given keys.
    Del(Vec<String>),
    /// An `expire` of the given key.
    Expire(String),
    /// A `ttl` query for the given key.
    Ttl(String),
    /// An `exists` query for the given key.
    Exists(String),
    /// A `set_bit` on the given key.
    SetBit(String),
    /// A `get_bit` on the given key.
    GetBit(String),
    /// A `bit_count` on the given key.
    BitCount(String),
    /// A procedure installation.
    Load(&'static str),
    /// A procedure evaluation.
    Eval {
        /// The procedure name.
        procedure: &'static str,
        /// The keys passed to the procedure.
        keys: Vec<String>,
    },
    /// A publish on a channel.
    Publish {
        /// The channel.
        channel: String,
        /// The payload.
        payload: String,
    },
    /// A subscription request for the given channels.
    Subscribe(Vec<String>),
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct Subscriber {
    channels: HashSet<String>,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    installed: HashSet<&'static str>,
    subscribers: Vec<Subscriber>,
    operations: Vec<StoreOp>,
}

struct Inner {
    clock: Clock,
    state: Mutex<State>,
    fail_when: Mutex<Option<FailPredicate>>,
}

/// A process-local fake store endpoint.
///
/// Clones share the same data, so handing clones to several components (or several
/// simulated processes) makes them observe one shared store.
///
/// # Examples
///
/// ```
/// use cairn_store::{RemoteStore, testing::{InMemoryStore, StoreOp}};
/// # futures::executor::block_on(async {
///
/// let store = InMemoryStore::new();
/// store.set("key", b"value", None).await?;
/// assert_eq!(store.get("key").await?, Some(b"value".to_vec()));
///
/// // Fail every write from now on
/// store.fail_when(|op| matches!(op, StoreOp::Set(_)));
/// assert!(store.set("key", b"other", None).await.is_err());
/// # Ok::<(), cairn_store::Error>(())
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryStore {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InMemoryStore")
            .field("entries", &state.entries.len())
            .field("installed", &state.installed)
            .field("subscribers", &state.subscribers.len())
            .field("fail_when", &self.inner.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with a frozen clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::new_frozen())
    }

    /// Creates an empty store that evaluates expiry against `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                state: Mutex::new(State::default()),
                fail_when: Mutex::new(None),
            }),
        }
    }

    /// Sets a predicate that decides which operations fail with a transport error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.inner.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.inner.fail_when.lock() = None;
    }

    /// Returns a copy of every recorded operation.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner.state.lock().operations.clone()
    }

    /// Clears the recorded operations.
    pub fn clear_operations(&self) {
        self.inner.state.lock().operations.clear();
    }

    /// Forgets every installed procedure, as a store restart would.
    pub fn flush_procedures(&self) {
        self.inner.state.lock().installed.clear();
    }

    /// Returns `true` if the named procedure is installed.
    #[must_use]
    pub fn is_installed(&self, procedure: &Procedure) -> bool {
        self.inner.state.lock().installed.contains(procedure.name())
    }

    /// Drops every open subscription connection. Their message streams end.
    pub fn disconnect_subscribers(&self) {
        self.inner.state.lock().subscribers.clear();
    }

    /// Returns the number of open subscription connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.subscribers.retain(|s| !s.sender.is_closed());
        state.subscribers.len()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = self.inner.clock.instant();
        self.inner
            .state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.expires_at.is_none_or(|at| at > now))
            .count()
    }

    fn begin(&self, op: StoreOp) -> Result<()> {
        let fail = self.inner.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.inner.state.lock().operations.push(op);
        if fail {
            return Err(Error::transport("in-memory store: injected failure"));
        }
        Ok(())
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut State, Instant) -> R) -> R {
        let now = self.inner.clock.instant();
        let mut state = self.inner.state.lock();
        state.entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        f(&mut state, now)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::protocol(format!("WRONGTYPE operation against key {key} holding the wrong kind of value"))
}

fn bytes_mut<'a>(state: &'a mut State, key: &str) -> Result<&'a mut Vec<u8>> {
    let entry = state.entries.entry(key.to_owned()).or_insert_with(|| Entry {
        value: Value::Bytes(Vec::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::Hash(_) => Err(wrong_type(key)),
    }
}

fn hash_mut<'a>(state: &'a mut State, key: &str) -> Result<&'a mut BTreeMap<String, String>> {
    let entry = state.entries.entry(key.to_owned()).or_insert_with(|| Entry {
        value: Value::Hash(BTreeMap::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Hash(hash) => Ok(hash),
        Value::Bytes(_) => Err(wrong_type(key)),
    }
}

fn read_bit(bytes: &[u8], offset: u64) -> bool {
    let Ok(byte) = usize::try_from(offset / 8) else {
        return false;
    };
    bytes.get(byte).is_some_and(|b| b & (0x80 >> (offset % 8)) != 0)
}

fn write_bit(bytes: &mut Vec<u8>, offset: u64, value: bool) -> Result<bool> {
    let byte = usize::try_from(offset / 8).map_err(Error::protocol)?;
    if bytes.len() <= byte {
        bytes.resize(byte + 1, 0);
    }
    let mask = 0x80 >> (offset % 8);
    let previous = bytes[byte] & mask != 0;
    if value {
        bytes[byte] |= mask;
    } else {
        bytes[byte] &= !mask;
    }
    Ok(previous)
}

fn arg<T: std::str::FromStr>(args: &[String], index: usize) -> Result<T> {
    args.get(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::protocol(format!("missing or malformed procedure argument {index}")))
}

fn first_key<'a>(keys: &[&'a str]) -> Result<&'a str> {
    keys.first().copied().ok_or_else(|| Error::protocol("procedure requires a key"))
}

fn run_procedure(state: &mut State, now: Instant, name: &str, keys: &[&str], args: &[String]) -> Result<Reply> {
    let key = first_key(keys)?;
    match name {
        n if n == BLOOM_ADD.name() => {
            let bits = bytes_mut(state, key)?;
            for index in 0..args.len() {
                write_bit(bits, arg(args, index)?, true)?;
            }
            Ok(Reply::Int(1))
        }
        n if n == BLOOM_CHECK.name() => {
            let bits = match state.entries.get(key).map(|entry| &entry.value) {
                Some(Value::Bytes(bits)) => bits.as_slice(),
                Some(Value::Hash(_)) => return Err(wrong_type(key)),
                None => &[],
            };
            for index in 0..args.len() {
                if !read_bit(bits, arg(args, index)?) {
                    return Ok(Reply::Int(0));
                }
            }
            Ok(Reply::Int(1))
        }
        n if n == RATE_LIMIT_INCREMENT.name() => {
            let now_ms: i64 = arg(args, 0)?;
            let window_ms: i64 = arg(args, 1)?;
            let bucket_ms: i64 = arg(args, 2)?;
            let amount: i64 = arg(args, 4)?;
            let current = now_ms - now_ms.rem_euclid(bucket_ms);
            let buckets = hash_mut(state, key)?;
            let slot = buckets.entry(current.to_string()).or_insert_with(|| "0".to_owned());
            *slot = (slot.parse::<i64>().unwrap_or_default() + amount).to_string();

            let cutoff = now_ms - window_ms;
            buckets.retain(|start, _| start.parse::<i64>().unwrap_or_default() >= cutoff);
            let total: i64 = buckets.values().map(|count| count.parse::<i64>().unwrap_or_default()).sum();

            let ttl = Duration::from_millis(u64::try_from(window_ms + bucket_ms).unwrap_or_default());
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
            Ok(Reply::Int(total))
        }
        n if n == STATS_RECORD.name() => {
            let value: f64 = arg(args, 0)?;
            let square: f64 = arg(args, 1)?;
            let fields = hash_mut(state, key)?;
            let read = |fields: &BTreeMap<String, String>, name: &str| fields.get(name).and_then(|v| v.parse::<f64>().ok());

            let count = fields.get("n").and_then(|v| v.parse::<i64>().ok()).unwrap_or_default() + 1;
            let sum = read(fields, "sum").unwrap_or_default() + value;
            let sum_sq = read(fields, "sumsq").unwrap_or_default() + square;
            let min = read(fields, "min").map_or(value, |min| min.min(value));
            let max = read(fields, "max").map_or(value, |max| max.max(value));

            fields.insert("n".to_owned(), count.to_string());
            fields.insert("sum".to_owned(), sum.to_string());
            fields.insert("sumsq".to_owned(), sum_sq.to_string());
            fields.insert("min".to_owned(), min.to_string());
            fields.insert("max".to_owned(), max.to_string());
            Ok(Reply::Int(count))
        }
        n if n == STATS_READ.name() => {
            let fields = match state.entries.get(key).map(|entry| &entry.value) {
                Some(Value::Hash(fields)) => Some(fields),
                Some(Value::Bytes(_)) => return Err(wrong_type(key)),
                None => None,
            };
            let items = ["n", "sum", "sumsq", "min", "max"]
                .into_iter()
                .map(|name| {
                    fields
                        .and_then(|f| f.get(name))
                        .map_or(Reply::Nil, |v| Reply::Bulk(v.as_bytes().to_vec()))
                })
                .collect();
            Ok(Reply::Array(items))
        }
        other => Err(Error::protocol(format!("in-memory store has no implementation for procedure {other}"))),
    }
}

impl RemoteStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.begin(StoreOp::Get(key.to_owned()))?;
        self.with_live(|state, _| match state.entries.get(key).map(|entry| &entry.value) {
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::Hash(_)) => Err(wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.begin(StoreOp::Set(key.to_owned()))?;
        self.with_live(|state, now| {
            state.entries.insert(
                key.to_owned(),
                Entry {
                    value: Value::Bytes(value.to_vec()),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.begin(StoreOp::Del(keys.iter().map(ToString::to_string).collect()))?;
        Ok(self.with_live(|state, _| keys.iter().filter(|key| state.entries.remove(**key).is_some()).count() as u64))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.begin(StoreOp::Expire(key.to_owned()))?;
        Ok(self.with_live(|state, now| {
            state.entries.get_mut(key).is_some_and(|entry| {
                entry.expires_at = Some(now + ttl);
                true
            })
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.begin(StoreOp::Ttl(key.to_owned()))?;
        Ok(self.with_live(|state, now| match state.entries.get(key) {
            None => Ttl::Missing,
            Some(entry) => entry
                .expires_at
                .map_or(Ttl::Persistent, |at| Ttl::Remaining(at.saturating_duration_since(now))),
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.begin(StoreOp::Exists(key.to_owned()))?;
        Ok(self.with_live(|state, _| state.entries.contains_key(key)))
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool> {
        self.begin(StoreOp::SetBit(key.to_owned()))?;
        self.with_live(|state, _| write_bit(bytes_mut(state, key)?, offset, value))
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool> {
        self.begin(StoreOp::GetBit(key.to_owned()))?;
        self.with_live(|state, _| match state.entries.get(key).map(|entry| &entry.value) {
            Some(Value::Bytes(bytes)) => Ok(read_bit(bytes, offset)),
            Some(Value::Hash(_)) => Err(wrong_type(key)),
            None => Ok(false),
        })
    }

    async fn bit_count(&self, key: &str) -> Result<u64> {
        self.begin(StoreOp::BitCount(key.to_owned()))?;
        self.with_live(|state, _| match state.entries.get(key).map(|entry| &entry.value) {
            Some(Value::Bytes(bytes)) => Ok(bytes.iter().map(|b| u64::from(b.count_ones())).sum()),
            Some(Value::Hash(_)) => Err(wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn load_procedure(&self, procedure: &Procedure) -> Result<ProcedureHandle> {
        self.begin(StoreOp::Load(procedure.name()))?;
        self.inner.state.lock().installed.insert(procedure.name());
        Ok(ProcedureHandle::new(procedure, procedure.name()))
    }

    async fn eval_procedure(&self, handle: &ProcedureHandle, keys: &[&str], args: &[String]) -> Result<Reply> {
        self.begin(StoreOp::Eval {
            procedure: handle.name(),
            keys: keys.iter().map(ToString::to_string).collect(),
        })?;
        self.with_live(|state, now| {
            if !state.installed.contains(handle.name()) {
                return Err(Error::procedure_missing(format!("NOSCRIPT {}", handle.digest())));
            }
            run_procedure(state, now, handle.name(), keys, args)
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        self.begin(StoreOp::Publish {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        })?;
        let mut state = self.inner.state.lock();
        state.subscribers.retain(|s| !s.sender.is_closed());
        let mut receivers = 0;
        for subscriber in state.subscribers.iter().filter(|s| s.channels.contains(channel)) {
            if subscriber.sender.unbounded_send(Message::new(channel, payload)).is_ok() {
                receivers += 1;
            }
        }
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream> {
        self.begin(StoreOp::Subscribe(channels.to_vec()))?;
        let (sender, receiver) = mpsc::unbounded();
        self.inner.state.lock().subscribers.push(Subscriber {
            channels: channels.iter().cloned().collect(),
            sender,
        });
        Ok(receiver.boxed())
    }
}
