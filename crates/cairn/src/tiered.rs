// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-tier cache.

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

use cairn_memory::{NearCache, NearCacheBuilder};
use cairn_store::{Codec, Expiration, JsonCodec, RemoteStore, Result, Ttl};
use serde::{Deserialize, Serialize};

use crate::{
    Context, Endpoint, MemoryValue,
    options::TieredCacheOptions,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry, CacheTier},
};

/// Which tiers an operation touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Only the process-local tier.
    Near,
    /// Only the shared store.
    Far,
    /// Both tiers. Reads try the near tier first.
    #[default]
    Both,
}

impl Target {
    fn near(self) -> bool {
        matches!(self, Self::Near | Self::Both)
    }

    fn far(self) -> bool {
        matches!(self, Self::Far | Self::Both)
    }
}

/// A process-local near tier in front of the shared far tier.
///
/// Values are encoded once with the cache's codec and the same bytes go to both tiers.
/// Writes to the far tier go to every pool owning the key; reads come from the primary
/// owner's read pool.
///
/// A [`Both`](Target::Both) read that misses near and hits far copies the value into the
/// near tier from a detached task, carrying over the far entry's remaining lifetime. The
/// caller does not wait for that copy. Without a tokio runtime the copy happens inline.
///
/// The tiers are not kept consistent with each other beyond that: a value changed
/// elsewhere stays stale in this process's near tier until it expires or is
/// invalidated, for example through [`ReplicatedConfigStore`](crate::ReplicatedConfigStore).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cairn::{Context, Endpoint, EndpointPool, Target, TieredCache, Topology};
/// use cairn_store::{Expiration, testing::InMemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::new(Topology::single(pool), Clock::new_frozen());
///
/// let cache = TieredCache::new(ctx, Default::default());
/// cache
///     .set("greeting", &"hello".to_owned(), Expiration::Absolute(Duration::from_secs(60)), Target::Both)
///     .await?;
///
/// let near = cache.get::<String>("greeting", Target::Near).await?;
/// let far = cache.get::<String>("greeting", Target::Far).await?;
/// assert_eq!(near.value(), "hello");
/// assert_eq!(far.value(), "hello");
///
/// assert!(!cache.get::<String>("missing", Target::Both).await?.exists());
/// # Ok::<(), cairn::Error>(())
/// # });
/// ```
pub struct TieredCache<S, C = JsonCodec> {
    ctx: Context<S>,
    near: NearCache,
    codec: Arc<C>,
    telemetry: CacheTelemetry,
}

impl<S: RemoteStore + 'static> TieredCache<S, JsonCodec> {
    /// Creates a cache that encodes values as JSON.
    #[must_use]
    pub fn new(ctx: Context<S>, options: TieredCacheOptions) -> Self {
        Self::with_codec(ctx, options, JsonCodec)
    }
}

impl<S: RemoteStore + 'static, C> TieredCache<S, C> {
    /// Creates a cache with a custom codec.
    #[must_use]
    pub fn with_codec(ctx: Context<S>, options: TieredCacheOptions, codec: C) -> Self {
        let near = NearCacheBuilder::from_options(ctx.clock().clone(), options.near).build();
        Self {
            telemetry: CacheTelemetry::new(&options.name),
            ctx,
            near,
            codec: Arc::new(codec),
        }
    }

    /// Counts cache events on `meter`.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn with_meter(mut self, meter: &opentelemetry::metrics::Meter) -> Self {
        self.telemetry = self.telemetry.with_meter(meter);
        self
    }

    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.telemetry.name()
    }

    /// Returns the near tier.
    #[must_use]
    pub fn near(&self) -> &NearCache {
        &self.near
    }

    /// Returns the context.
    #[must_use]
    pub fn context(&self) -> &Context<S> {
        &self.ctx
    }

    /// Stores `value` under `key` in the targeted tiers.
    ///
    /// In the far tier an expiration becomes the key's time-to-live.
    ///
    /// # Errors
    ///
    /// Returns a codec error, or the first store error. The near tier is written
    /// before the far tier.
    pub async fn set<T>(&self, key: &str, value: &T, expiration: Expiration, target: Target) -> Result<()>
    where
        C: Codec<T>,
    {
        let bytes = self.codec.encode(value)?;

        if target.near() {
            self.near.insert(key, bytes.clone(), expiration);
            self.record(CacheOperation::Set, CacheActivity::Inserted, CacheTier::Near);
        }

        if target.far() {
            for pool in self.ctx.topology().owners_for(key) {
                let set = pool.write()?.store().set(key, &bytes, expiration.duration()).await;
                self.far_result(CacheOperation::Set, set)?;
            }
            self.record(CacheOperation::Set, CacheActivity::Inserted, CacheTier::Far);
        }

        Ok(())
    }

    /// Stores `value` with sliding expiration.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub async fn set_sliding<T>(&self, key: &str, value: &T, sliding: Duration, target: Target) -> Result<()>
    where
        C: Codec<T>,
    {
        self.set(key, value, Expiration::Sliding(sliding), target).await
    }

    /// Reads `key` from the targeted tiers.
    ///
    /// # Errors
    ///
    /// Returns a codec error or a store error.
    pub async fn get<T>(&self, key: &str, target: Target) -> Result<MemoryValue<T>>
    where
        C: Codec<T>,
        T: Default,
    {
        if target.near() {
            if let Some(bytes) = self.near.get(key) {
                self.record(CacheOperation::Get, CacheActivity::Hit, CacheTier::Near);
                return self.decode(&bytes);
            }
            self.record(CacheOperation::Get, CacheActivity::Miss, CacheTier::Near);
        }

        if !target.far() {
            return Ok(MemoryValue::missing());
        }

        let endpoint = self.read_endpoint(key)?;
        let Some(bytes) = self.far_result(CacheOperation::Get, endpoint.store().get(key).await)? else {
            self.record(CacheOperation::Get, CacheActivity::Miss, CacheTier::Far);
            return Ok(MemoryValue::missing());
        };
        self.record(CacheOperation::Get, CacheActivity::Hit, CacheTier::Far);

        let value = self.decode(&bytes)?;
        if target.near() {
            self.populate_near(endpoint.clone(), key, bytes).await;
        }
        Ok(value)
    }

    /// Reads `key` and pushes its expiry out by `sliding`.
    ///
    /// The near entry becomes a sliding entry; in the far tier the key's time-to-live
    /// is reset on every owning pool.
    ///
    /// # Errors
    ///
    /// Returns a codec error or a store error.
    pub async fn get_sliding<T>(&self, key: &str, sliding: Duration, target: Target) -> Result<MemoryValue<T>>
    where
        C: Codec<T>,
        T: Default,
    {
        if target.near() {
            if let Some(bytes) = self.near.get_sliding(key, sliding) {
                self.record(CacheOperation::Get, CacheActivity::Hit, CacheTier::Near);
                if target.far() {
                    self.expire_far(key, sliding).await?;
                }
                return self.decode(&bytes);
            }
            self.record(CacheOperation::Get, CacheActivity::Miss, CacheTier::Near);
        }

        if !target.far() {
            return Ok(MemoryValue::missing());
        }

        let endpoint = self.read_endpoint(key)?;
        let Some(bytes) = self.far_result(CacheOperation::Get, endpoint.store().get(key).await)? else {
            self.record(CacheOperation::Get, CacheActivity::Miss, CacheTier::Far);
            return Ok(MemoryValue::missing());
        };
        self.record(CacheOperation::Get, CacheActivity::Hit, CacheTier::Far);
        self.expire_far(key, sliding).await?;

        let value = self.decode(&bytes)?;
        if target.near() {
            self.near.insert(key, bytes, Expiration::Sliding(sliding));
            self.record(CacheOperation::Populate, CacheActivity::Populated, CacheTier::Near);
        }
        Ok(value)
    }

    /// Gives `key` an absolute lifetime of `ttl` from now in the targeted tiers.
    ///
    /// Returns `true` if the key existed in any of them.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn expire(&self, key: &str, ttl: Duration, target: Target) -> Result<bool> {
        let mut found = false;
        if target.near() {
            found |= self.near.expire(key, ttl);
        }
        if target.far() {
            found |= self.expire_far(key, ttl).await?;
        }
        Ok(found)
    }

    /// Returns `true` if `key` exists in any of the targeted tiers.
    ///
    /// Does not extend sliding expiry.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn exists(&self, key: &str, target: Target) -> Result<bool> {
        if target.near() && self.near.contains(key) {
            return Ok(true);
        }
        if target.far() {
            let endpoint = self.read_endpoint(key)?;
            return self.far_result(CacheOperation::Exists, endpoint.store().exists(key).await);
        }
        Ok(false)
    }

    /// Removes `key` from the targeted tiers.
    ///
    /// Returns `true` if the key existed in any of them.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn remove(&self, key: &str, target: Target) -> Result<bool> {
        let mut found = false;
        if target.near() && self.near.invalidate(key) {
            found = true;
            self.record(CacheOperation::Remove, CacheActivity::Removed, CacheTier::Near);
        }
        if target.far() {
            let mut primary = None;
            for pool in self.ctx.topology().owners_for(key) {
                let removed = self.far_result(CacheOperation::Remove, pool.write()?.store().del(&[key]).await)?;
                primary.get_or_insert(removed > 0);
            }
            if primary == Some(true) {
                found = true;
                self.record(CacheOperation::Remove, CacheActivity::Removed, CacheTier::Far);
            }
        }
        Ok(found)
    }

    // Returns the primary owner's answer.
    async fn expire_far(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut primary = None;
        for pool in self.ctx.topology().owners_for(key) {
            let expired = self.far_result(CacheOperation::Expire, pool.write()?.store().expire(key, ttl).await)?;
            primary.get_or_insert(expired);
        }
        if primary == Some(true) {
            self.record(CacheOperation::Expire, CacheActivity::Refreshed, CacheTier::Far);
        }
        Ok(primary.unwrap_or(false))
    }

    async fn populate_near(&self, endpoint: Endpoint<S>, key: &str, bytes: Vec<u8>) {
        let near = self.near.clone();
        let telemetry = self.telemetry.clone();
        let key = key.to_owned();
        let populate = async move {
            match endpoint.store().ttl(&key).await.map(Ttl::expiration) {
                Ok(Some(expiration)) => {
                    near.insert(key, bytes, expiration);
                    telemetry.record(CacheOperation::Populate, CacheActivity::Populated, CacheTier::Near);
                }
                // Expired or removed between the read and the ttl lookup.
                Ok(None) => {
                    tracing::debug!(cache.name = telemetry.name(), "cache.populate_skipped");
                }
                Err(error) => {
                    tracing::debug!(cache.name = telemetry.name(), error = %error, "cache.populate_skipped");
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn(populate)),
            Err(_) => populate.await,
        }
    }

    fn read_endpoint(&self, key: &str) -> Result<&Endpoint<S>> {
        self.ctx.topology().primary_for(key)?.next_read()
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<MemoryValue<T>>
    where
        C: Codec<T>,
    {
        self.codec.decode(bytes).map(MemoryValue::present)
    }

    fn far_result<R>(&self, operation: CacheOperation, result: Result<R>) -> Result<R> {
        if result.is_err() {
            self.record(operation, CacheActivity::Error, CacheTier::Far);
        }
        result
    }

    fn record(&self, operation: CacheOperation, activity: CacheActivity, tier: CacheTier) {
        self.telemetry.record(operation, activity, tier);
    }
}

impl<S, C> Clone for TieredCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            near: self.near.clone(),
            codec: Arc::clone(&self.codec),
            telemetry: self.telemetry.clone(),
        }
    }
}

impl<S, C> Debug for TieredCache<S, C> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.telemetry.name())
            .field("near", &self.near)
            .field("context", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use cairn_store::testing::InMemoryStore;
    use futures::executor::block_on;
    use opentelemetry::{KeyValue, metrics::MeterProvider};
    use tick::Clock;

    use super::*;
    use crate::{
        EndpointPool, Topology,
        telemetry::{
            attributes,
            testing::{LogCapture, MetricTester},
        },
    };

    fn cache(store: &InMemoryStore) -> TieredCache<InMemoryStore> {
        let mut pool = EndpointPool::new("main");
        pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
        let options = TieredCacheOptions {
            name: "profiles".to_owned(),
            ..TieredCacheOptions::default()
        };
        TieredCache::new(Context::new(Topology::single(pool), Clock::new_frozen()), options)
    }

    #[test]
    fn target_membership() {
        assert!(Target::Both.near() && Target::Both.far());
        assert!(Target::Near.near() && !Target::Near.far());
        assert!(!Target::Far.near() && Target::Far.far());
    }

    #[test]
    fn read_through_counts_each_tier() {
        let tester = MetricTester::new();
        let meter = tester.meter_provider().meter("cairn");
        let store = InMemoryStore::new();
        let cache = cache(&store).with_meter(&meter);

        block_on(cache.set("k", &1_u8, Expiration::None, Target::Far)).expect("set");
        block_on(cache.get::<u8>("k", Target::Both)).expect("get");

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_NAME, "profiles"),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, "cache.miss"),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, "cache.hit"),
            KeyValue::new(attributes::CACHE_OPERATION_NAME, "cache.populate"),
            KeyValue::new(attributes::CACHE_TIER_NAME, "near"),
        ]);
    }

    #[test]
    fn far_failures_are_logged_as_errors() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let store = InMemoryStore::new();
        store.fail_when(|_| true);

        let error = block_on(cache(&store).exists("k", Target::Far)).expect_err("store down");

        assert_eq!(error.kind(), cairn_store::ErrorKind::Transport);
        capture.assert_contains("ERROR");
        capture.assert_contains("cache.exists");
        capture.assert_contains("cache.error");
    }

    #[test]
    fn populate_skips_near_when_ttl_lookup_fails() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let store = InMemoryStore::new();
        let cache = cache(&store);
        block_on(cache.set("k", &1_u8, Expiration::None, Target::Far)).expect("set");
        store.fail_when(|op| matches!(op, cairn_store::testing::StoreOp::Ttl(_)));

        assert!(block_on(cache.get::<u8>("k", Target::Both)).expect("get").exists());

        assert!(!cache.near().contains("k"));
        capture.assert_contains("cache.populate_skipped");
    }
}
