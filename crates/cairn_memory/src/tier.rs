// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Near tier implementation using moka.
//!
//! Each entry carries its own expiration. Moka evicts entries in the background after
//! their configured lifetime, and every read additionally checks a deadline computed
//! from the cache's [`Clock`], so expiry is exact and testable with a controlled clock.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use cairn_store::Expiration;
use moka::{Expiry, sync::Cache};
use tick::Clock;

use crate::builder::NearCacheBuilder;

#[derive(Debug, Clone)]
struct NearEntry {
    value: Arc<[u8]>,
    expiration: Expiration,
    deadline: Option<Instant>,
}

impl NearEntry {
    fn new(value: Arc<[u8]>, expiration: Expiration, now: Instant) -> Self {
        Self {
            value,
            deadline: expiration.duration().map(|ttl| now + ttl),
            expiration,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Lets moka reclaim entries on its own schedule.
struct EntryExpiry;

impl Expiry<String, NearEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &NearEntry, _created_at: Instant) -> Option<Duration> {
        value.expiration.duration()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &NearEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expiration.duration()
    }
}

/// A process-local cache of encoded values.
///
/// Cloning is cheap; clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cairn_memory::NearCache;
/// use cairn_store::Expiration;
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let cache = NearCache::builder(control.to_clock()).build();
///
/// cache.insert("session", b"token".to_vec(), Expiration::Sliding(Duration::from_secs(10)));
///
/// control.advance(Duration::from_secs(8));
/// assert!(cache.get("session").is_some()); // re-arms the deadline
///
/// control.advance(Duration::from_secs(8));
/// assert!(cache.get("session").is_some());
///
/// control.advance(Duration::from_secs(10));
/// assert!(cache.get("session").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct NearCache {
    inner: Cache<String, NearEntry>,
    clock: Clock,
}

impl NearCache {
    /// Creates a builder for configuring a near cache.
    #[must_use]
    pub fn builder(clock: Clock) -> NearCacheBuilder {
        NearCacheBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: NearCacheBuilder) -> Self {
        let NearCacheBuilder { options, clock } = builder;
        let mut moka_builder = Cache::builder().max_capacity(options.max_capacity).expire_after(EntryExpiry);

        if let Some(capacity) = options.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(name) = options.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        Self {
            inner: moka_builder.build(),
            clock,
        }
    }

    /// Returns the clock expiry is evaluated against.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Stores `value` under `key` with the given expiration, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Arc<[u8]>>, expiration: Expiration) {
        let entry = NearEntry::new(value.into(), expiration, self.clock.instant());
        self.inner.insert(key.into(), entry);
    }

    /// Returns the value stored under `key`.
    ///
    /// Reading an entry stored with sliding expiration pushes its deadline out by the
    /// sliding window.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let entry = self.live(key)?;
        if let Expiration::Sliding(window) = entry.expiration {
            self.rearm(key, entry.value.clone(), Expiration::Sliding(window));
        }
        Some(entry.value)
    }

    /// Returns the value stored under `key` and switches the entry to sliding
    /// expiration with the given window, re-armed from now.
    pub fn get_sliding(&self, key: &str, window: Duration) -> Option<Arc<[u8]>> {
        let entry = self.live(key)?;
        self.rearm(key, entry.value.clone(), Expiration::Sliding(window));
        Some(entry.value)
    }

    /// Gives an existing entry an absolute lifetime of `ttl` from now.
    ///
    /// Returns `false` if the key is not present.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let Some(entry) = self.live(key) else {
            return false;
        };
        self.rearm(key, entry.value, Expiration::Absolute(ttl));
        true
    }

    /// Returns the time left before `key` expires, or `None` if it is missing or never expires.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.instant();
        self.live(key)?.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Returns `true` if `key` holds a live entry. Does not re-arm sliding entries.
    pub fn contains(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Removes `key`. Returns `true` if a live entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let now = self.clock.instant();
        self.inner.remove(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Returns the approximate number of entries.
    ///
    /// Moka applies writes lazily, so the count may lag behind recent operations.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Returns `true` if the cache holds no entries, subject to the same lag as [`len`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<NearEntry> {
        let entry = self.inner.get(key)?;
        if entry.is_expired(self.clock.instant()) {
            self.inner.invalidate(key);
            return None;
        }
        Some(entry)
    }

    fn rearm(&self, key: &str, value: Arc<[u8]>, expiration: Expiration) {
        let entry = NearEntry::new(value, expiration, self.clock.instant());
        self.inner.insert(key.to_owned(), entry);
    }
}
