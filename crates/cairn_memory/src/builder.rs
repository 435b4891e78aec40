// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder and options for configuring near caches.

use serde::{Deserialize, Serialize};
use tick::Clock;

use crate::tier::NearCache;

/// Serializable near cache settings.
///
/// Missing fields take their defaults, so an empty document is a valid configuration.
///
/// # Examples
///
/// ```
/// use cairn_memory::NearCacheOptions;
///
/// let options: NearCacheOptions = serde_json::from_str(r#"{ "max_capacity": 500 }"#)?;
/// assert_eq!(options.max_capacity, 500);
/// assert_eq!(options.name, None);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearCacheOptions {
    /// Maximum number of entries before eviction kicks in.
    pub max_capacity: u64,
    /// Pre-allocation hint.
    pub initial_capacity: Option<usize>,
    /// Name shown in moka debugging output.
    pub name: Option<String>,
}

impl NearCacheOptions {
    /// The default maximum number of entries.
    pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;
}

impl Default for NearCacheOptions {
    fn default() -> Self {
        Self {
            max_capacity: Self::DEFAULT_MAX_CAPACITY,
            initial_capacity: None,
            name: None,
        }
    }
}

/// Builder for configuring a [`NearCache`].
///
/// # Examples
///
/// ```
/// use cairn_memory::NearCache;
/// use tick::Clock;
///
/// let cache = NearCache::builder(Clock::new_frozen())
///     .max_capacity(1000)
///     .initial_capacity(100)
///     .name("sessions")
///     .build();
/// ```
#[derive(Debug)]
pub struct NearCacheBuilder {
    pub(crate) options: NearCacheOptions,
    pub(crate) clock: Clock,
}

impl NearCacheBuilder {
    /// Creates a builder with default settings.
    ///
    /// The default cache holds up to 10 000 entries. Expiry deadlines are evaluated
    /// against `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::from_options(clock, NearCacheOptions::default())
    }

    /// Creates a builder from deserialized options.
    #[must_use]
    pub fn from_options(clock: Clock, options: NearCacheOptions) -> Self {
        Self { options, clock }
    }

    /// Sets the maximum number of entries.
    ///
    /// Once reached, moka evicts entries using its `TinyLFU` policy.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.options.max_capacity = capacity;
        self
    }

    /// Sets the initial capacity (pre-allocation hint).
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.options.initial_capacity = Some(capacity);
        self
    }

    /// Sets a name for the cache.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Returns a reference to the builder's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Builds the configured [`NearCache`].
    #[must_use]
    pub fn build(self) -> NearCache {
        NearCache::from_builder(self)
    }
}
