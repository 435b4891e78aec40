// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cluster-wide configuration values with change and removal broadcasts.

use cairn_store::{Codec, Error, Expiration, JsonCodec, RemoteStore, Result};

use crate::{InvalidationBus, MemoryValue, Target, TieredCache, options::ConfigStoreOptions};

/// Channel carrying `key:<node id>` change notices.
pub const CHANGED_CHANNEL: &str = "cairn:config:changed";

/// Channel carrying `key` removal notices.
pub const REMOVED_CHANNEL: &str = "cairn:config:removed";

/// Typed key/value settings shared by every process, cached locally.
///
/// The far tier holds the authoritative value without expiry. Each process keeps a near
/// copy for at most [`near_ttl`](ConfigStoreOptions::near_ttl) and drops it as soon as
/// another process announces a change or a removal. A process that receives a removal
/// notice only drops its own copy and never announces the removal again, so notices do
/// not circulate.
///
/// Keys must not contain `:`, which separates the key from the node id in change notices.
///
/// # Examples
///
/// ```
/// use cairn::{
///     Context, Endpoint, EndpointPool, InvalidationBus, ReplicatedConfigStore, TieredCache, Topology,
/// };
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cairn::Error> {
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::new(Topology::single(pool), Clock::new_tokio());
///
/// let cache = TieredCache::new(ctx.clone(), Default::default());
/// let bus = InvalidationBus::start(ctx, Default::default())?;
/// let config = ReplicatedConfigStore::start(cache, bus, Default::default())?;
///
/// config.set("feature.checkout_v2", &true, true).await?;
/// assert!(*config.get::<bool>("feature.checkout_v2").await?.value());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReplicatedConfigStore<S, C = JsonCodec> {
    cache: TieredCache<S, C>,
    bus: InvalidationBus<S>,
    options: ConfigStoreOptions,
}

impl<S, C> Clone for ReplicatedConfigStore<S, C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            options: self.options.clone(),
        }
    }
}

impl<S: RemoteStore + 'static, C> ReplicatedConfigStore<S, C> {
    /// Subscribes to change and removal notices and returns the store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `bus` already has channel-wide subscriptions on
    /// the reserved channels.
    pub fn start(cache: TieredCache<S, C>, bus: InvalidationBus<S>, options: ConfigStoreOptions) -> Result<Self> {
        let node_id = cache.context().node_id().to_string();
        let near = cache.near().clone();
        bus.subscribe(CHANGED_CHANNEL, move |payload| {
            let Some((key, origin)) = payload.split_once(':') else {
                tracing::warn!(bus.channel = CHANGED_CHANNEL, bus.payload = payload, "config.malformed_notice");
                return;
            };
            if origin != node_id {
                near.invalidate(key);
                tracing::debug!(config.key = key, config.origin = origin, "config.changed");
            }
        })?;

        let near = cache.near().clone();
        bus.subscribe(REMOVED_CHANNEL, move |key| {
            near.invalidate(key);
            tracing::debug!(config.key = key, "config.removed");
        })?;

        Ok(Self { cache, bus, options })
    }

    /// Returns the bus the store listens on.
    #[must_use]
    pub fn bus(&self) -> &InvalidationBus<S> {
        &self.bus
    }

    /// Returns the cache the store reads and writes through.
    #[must_use]
    pub fn cache(&self) -> &TieredCache<S, C> {
        &self.cache
    }

    /// Reads `key`, from the near copy if there is one and from the far tier otherwise.
    ///
    /// # Errors
    ///
    /// Returns a codec error or a store error.
    pub async fn get<T>(&self, key: &str) -> Result<MemoryValue<T>>
    where
        C: Codec<T>,
        T: Default,
    {
        let near = self.cache.get(key, Target::Near).await?;
        if near.exists() {
            return Ok(near);
        }

        let far = self.cache.get(key, Target::Far).await?;
        if far.exists() {
            self.cache
                .set(key, far.value(), Expiration::Absolute(self.options.near_ttl), Target::Near)
                .await?;
        }
        Ok(far)
    }

    /// Stores `value` under `key` and, if `broadcast` is set, tells the other processes
    /// to drop their copies.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for keys containing `:`, a codec error or a store error.
    pub async fn set<T>(&self, key: &str, value: &T, broadcast: bool) -> Result<()>
    where
        C: Codec<T>,
    {
        validate(key)?;
        self.cache.set(key, value, Expiration::None, Target::Far).await?;
        self.cache
            .set(key, value, Expiration::Absolute(self.options.near_ttl), Target::Near)
            .await?;

        if broadcast {
            let node_id = self.cache.context().node_id().to_string();
            self.bus.publish_key(CHANGED_CHANNEL, key, &node_id).await?;
        }
        Ok(())
    }

    /// Blocking form of [`set`](Self::set).
    ///
    /// Blocks the calling thread until the write completes. Must not be called from
    /// inside an async task.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_blocking<T>(&self, key: &str, value: &T, broadcast: bool) -> Result<()>
    where
        C: Codec<T>,
    {
        futures::executor::block_on(self.set(key, value, broadcast))
    }

    /// Removes `key` from both tiers and, if `broadcast` is set, tells the other
    /// processes to drop their copies.
    ///
    /// Returns `true` if the key existed in either tier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for keys containing `:`, or a store error.
    pub async fn remove(&self, key: &str, broadcast: bool) -> Result<bool> {
        validate(key)?;
        let removed = self.cache.remove(key, Target::Both).await?;
        if broadcast {
            self.bus.publish_removal(REMOVED_CHANNEL, key).await?;
        }
        Ok(removed)
    }

    /// Runs `callback` with the originating node id whenever a change to `key` is announced.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for keys containing `:` or if `key` is already watched.
    pub fn watch<F>(&self, key: &str, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        validate(key)?;
        self.bus.subscribe_key(CHANGED_CHANNEL, key, callback)
    }
}

fn validate(key: &str) -> Result<()> {
    if key.contains(':') {
        return Err(Error::configuration(format!("config key {key:?} must not contain ':'")));
    }
    Ok(())
}
