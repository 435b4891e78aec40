// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routing of keys to endpoint pools.

use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
};

use cairn_store::{Error, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::{Endpoint, EndpointPool, options::TopologyOptions};

/// Decides which pools own a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardPolicy {
    /// Every pool owns every key, in registration order.
    #[default]
    Broadcast,
    /// Highest-random-weight hashing: the `replicas` pools with the highest score for
    /// a key own it.
    Rendezvous {
        /// How many pools own each key. Clamped to the number of pools.
        replicas: usize,
    },
}

/// The set of endpoint pools a context talks to and the policy that routes keys to them.
///
/// Mutations go to every owner of a key; reads and the reported result of a mutation
/// come from the first (primary) owner.
pub struct Topology<S> {
    pools: Vec<EndpointPool<S>>,
    policy: ShardPolicy,
}

impl<S> Debug for Topology<S> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("pools", &self.pools)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<S> Default for Topology<S> {
    fn default() -> Self {
        Self::new(ShardPolicy::default())
    }
}

impl<S> Topology<S> {
    /// Creates an empty topology.
    #[must_use]
    pub fn new(policy: ShardPolicy) -> Self {
        Self { pools: Vec::new(), policy }
    }

    /// Creates a topology with a single pool, the common single-primary deployment.
    #[must_use]
    pub fn single(pool: EndpointPool<S>) -> Self {
        Self {
            pools: vec![pool],
            policy: ShardPolicy::Broadcast,
        }
    }

    /// Builds a topology from options, connecting every endpoint with `connect`.
    ///
    /// Endpoints are named `<pool>:write` and `<pool>:read:<index>`.
    ///
    /// # Errors
    ///
    /// Returns the first connection error, or a configuration error for invalid options.
    ///
    /// # Examples
    ///
    /// ```
    /// use cairn::{Topology, TopologyOptions};
    /// use cairn_store::testing::InMemoryStore;
    /// # futures::executor::block_on(async {
    ///
    /// let options: TopologyOptions = serde_json::from_str(
    ///     r#"{ "pools": [{ "name": "main", "write": "mem://primary", "reads": ["mem://replica"] }] }"#,
    /// )?;
    /// let store = InMemoryStore::new();
    /// let topology = Topology::connect(&options, |_url| {
    ///     let store = store.clone();
    ///     async move { Ok(store) }
    /// })
    /// .await?;
    ///
    /// assert_eq!(topology.pools()[0].read_pool().len(), 3);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # });
    /// ```
    pub async fn connect<F, Fut>(options: &TopologyOptions, mut connect: F) -> Result<Self>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let mut topology = Self::new(options.policy);
        for pool_options in &options.pools {
            let mut pool = EndpointPool::with_weights(&pool_options.name, pool_options.read_weight, pool_options.write_weight);
            if let Some(url) = &pool_options.write {
                let store = connect(url.as_str()).await?;
                pool.add_write(Endpoint::new(format!("{}:write", pool_options.name), store))?;
            }
            for (index, url) in pool_options.reads.iter().enumerate() {
                let store = connect(url.as_str()).await?;
                pool.add_read(Endpoint::new(format!("{}:read:{index}", pool_options.name), store));
            }
            topology.add_pool(pool)?;
        }
        Ok(topology)
    }

    /// Adds a pool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pool with the same name exists.
    pub fn add_pool(&mut self, pool: EndpointPool<S>) -> Result<()> {
        if self.pools.iter().any(|existing| existing.name() == pool.name()) {
            return Err(Error::configuration(format!("duplicate pool {}", pool.name())));
        }
        self.pools.push(pool);
        Ok(())
    }

    /// Returns the routing policy.
    #[must_use]
    pub fn policy(&self) -> ShardPolicy {
        self.policy
    }

    /// Returns every pool in registration order.
    #[must_use]
    pub fn pools(&self) -> &[EndpointPool<S>] {
        &self.pools
    }

    /// Returns the pools that own `key`, primary first.
    #[must_use]
    pub fn owners_for(&self, key: &str) -> Vec<&EndpointPool<S>> {
        match self.policy {
            ShardPolicy::Broadcast => self.pools.iter().collect(),
            ShardPolicy::Rendezvous { replicas } => {
                let mut scored: Vec<_> = self.pools.iter().map(|pool| (score(pool.name(), key), pool)).collect();
                scored.sort_by(|(a, _), (b, _)| b.cmp(a));
                scored.into_iter().take(replicas.max(1)).map(|(_, pool)| pool).collect()
            }
        }
    }

    /// Returns the primary owner of `key`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the topology has no pools.
    pub fn primary_for(&self, key: &str) -> Result<&EndpointPool<S>> {
        self.owners_for(key)
            .into_iter()
            .next()
            .ok_or_else(|| Error::configuration("topology has no pools"))
    }

    /// Returns the write endpoint of every pool, for key-independent operations.
    #[must_use]
    pub fn all_writes(&self) -> Vec<&Endpoint<S>> {
        self.pools.iter().flat_map(EndpointPool::writes).collect()
    }
}

fn score(pool: &str, key: &str) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(pool.as_bytes());
    hasher.update(key.as_bytes());
    hasher.digest()
}
