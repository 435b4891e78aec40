// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A sliding-window rate limiter whose counters live in the shared store.

use std::time::{Duration, SystemTime};

use cairn_store::{Error, RemoteStore, Result, procedure};

use crate::Context;

/// The in-window total after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    /// Sum of all amounts recorded inside the window, including this one.
    pub total: i64,
    /// The limit the increment was made against.
    pub limit: u64,
}

impl RateLimitOutcome {
    /// Returns `true` if the total is above the limit.
    #[must_use]
    pub fn exceeded(&self) -> bool {
        u64::try_from(self.total).is_ok_and(|total| total > self.limit)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    window: Duration,
    bucket: Duration,
    limit: u64,
}

/// Counts events per key over a sliding window made of fixed-size buckets.
///
/// Each increment adds to the bucket containing the current time, drops buckets that
/// have slid out of the window and returns the remaining total, all in one atomic round
/// trip. The increment is always applied; callers decide what to do with an
/// [exceeded](RateLimitOutcome::exceeded) outcome.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cairn::{Context, Endpoint, EndpointPool, RateLimiter, Topology};
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::initialize(Topology::single(pool), Clock::new_frozen()).await?;
///
/// let limiter = RateLimiter::new(ctx).with_window(Duration::from_secs(60), Duration::from_secs(1), 2);
/// assert!(!limiter.hit("login:alice").await?.exceeded());
/// assert!(!limiter.hit("login:alice").await?.exceeded());
/// assert!(limiter.hit("login:alice").await?.exceeded());
/// # Ok::<(), cairn::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct RateLimiter<S> {
    ctx: Context<S>,
    preset: Option<Window>,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            preset: self.preset,
        }
    }
}

impl<S: RemoteStore> RateLimiter<S> {
    /// Creates a rate limiter without a preset window.
    #[must_use]
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx, preset: None }
    }

    /// Sets the window used by [`hit`](Self::hit).
    #[must_use]
    pub fn with_window(mut self, window: Duration, bucket: Duration, limit: u64) -> Self {
        self.preset = Some(Window { window, bucket, limit });
        self
    }

    /// Adds `amount` to `key` and returns the new in-window total.
    ///
    /// The increment is applied on every pool that owns the key; the outcome reported
    /// is the primary owner's.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `bucket` is zero or longer than `window`, and
    /// store errors otherwise.
    pub async fn increment(&self, key: &str, window: Duration, bucket: Duration, limit: u64, amount: i64) -> Result<RateLimitOutcome> {
        if bucket.is_zero() || bucket > window {
            return Err(Error::configuration(format!(
                "rate limit bucket {bucket:?} must be non-zero and no longer than the window {window:?}"
            )));
        }

        let args = [
            self.now_millis().to_string(),
            window.as_millis().to_string(),
            bucket.as_millis().to_string(),
            limit.to_string(),
            amount.to_string(),
        ];

        let mut outcome = None;
        for pool in self.ctx.topology().owners_for(key) {
            let reply = self.ctx.eval(pool.write()?, &procedure::RATE_LIMIT_INCREMENT, &[key], &args).await?;
            if outcome.is_none() {
                outcome = Some(RateLimitOutcome {
                    total: reply.as_i64()?,
                    limit,
                });
            }
        }

        outcome.ok_or_else(|| Error::configuration("topology has no pools"))
    }

    /// Adds one to `key` using the preset window.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no window was set with
    /// [`with_window`](Self::with_window), and store errors otherwise.
    pub async fn hit(&self, key: &str) -> Result<RateLimitOutcome> {
        let Window { window, bucket, limit } = self
            .preset
            .ok_or_else(|| Error::configuration("rate limiter has no preset window"))?;
        self.increment(key, window, bucket, limit, 1).await
    }

    fn now_millis(&self) -> u128 {
        self.ctx
            .clock()
            .system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }
}
