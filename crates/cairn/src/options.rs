// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serializable settings for every cairn component.
//!
//! All option types take their defaults for missing fields, so they can be loaded from
//! any serde format and partially specified.

use std::time::Duration;

use cairn_memory::NearCacheOptions;
use serde::{Deserialize, Serialize};

use crate::{EndpointPool, ShardPolicy};

/// Settings for one endpoint pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Unique pool name.
    pub name: String,
    /// Url of the write endpoint.
    pub write: Option<String>,
    /// Urls of the read endpoints.
    pub reads: Vec<String>,
    /// How many times each read endpoint appears in the read pool. Defaults to 2.
    pub read_weight: usize,
    /// How many times the write endpoint appears in the read pool. Defaults to 1.
    pub write_weight: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            write: None,
            reads: Vec::new(),
            read_weight: EndpointPool::<()>::DEFAULT_READ_WEIGHT,
            write_weight: EndpointPool::<()>::DEFAULT_WRITE_WEIGHT,
        }
    }
}

/// Settings for a whole [`Topology`](crate::Topology).
///
/// # Examples
///
/// ```
/// use cairn::{ShardPolicy, TopologyOptions};
///
/// let options: TopologyOptions = serde_json::from_str(
///     r#"{
///         "policy": { "kind": "rendezvous", "replicas": 1 },
///         "pools": [
///             { "name": "east", "write": "redis://east:6379" },
///             { "name": "west", "write": "redis://west:6379", "read_weight": 4 }
///         ]
///     }"#,
/// )?;
///
/// assert_eq!(options.policy, ShardPolicy::Rendezvous { replicas: 1 });
/// assert_eq!(options.pools[0].read_weight, 2);
/// assert_eq!(options.pools[1].read_weight, 4);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyOptions {
    /// The pools, in registration order.
    pub pools: Vec<PoolOptions>,
    /// How keys map to pools.
    pub policy: ShardPolicy,
}

/// Settings for a [`TieredCache`](crate::TieredCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredCacheOptions {
    /// Name reported in logs and metrics. Defaults to `cairn`.
    pub name: String,
    /// Near tier settings.
    pub near: NearCacheOptions,
}

impl Default for TieredCacheOptions {
    fn default() -> Self {
        Self {
            name: "cairn".to_owned(),
            near: NearCacheOptions::default(),
        }
    }
}

/// Settings for a [`ReplicatedConfigStore`](crate::ReplicatedConfigStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigStoreOptions {
    /// How long a value stays in the near tier before it is read again from the far tier.
    pub near_ttl: Duration,
}

impl Default for ConfigStoreOptions {
    fn default() -> Self {
        Self {
            near_ttl: Duration::from_secs(60),
        }
    }
}

/// Settings for an [`InvalidationBus`](crate::InvalidationBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusOptions {
    /// Delay after the first failed subscribe attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff.
    pub max_backoff: Duration,
    /// Capacity of the recently-self-published set.
    pub dedupe_capacity: u64,
    /// How long a self-published removal is remembered.
    pub dedupe_ttl: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            dedupe_capacity: 10_000,
            dedupe_ttl: Duration::from_secs(60),
        }
    }
}
