// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Running statistics folded atomically in the shared store.

use cairn_store::{Error, RemoteStore, Reply, Result, procedure};

use crate::Context;

/// A snapshot of the samples recorded under one key.
///
/// The store keeps the count, the sum and the sum of squares; everything else is
/// derived. With no samples every value is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    /// Number of samples.
    pub count: u64,
    /// Sum of all samples.
    pub sum: f64,
    /// Sum of the squares of all samples.
    pub sum_of_squares: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

impl Statistics {
    /// Returns the arithmetic mean.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "sample counts stay far below 2^52")]
    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    /// Returns the variance with Bessel's correction, dividing by `count - 1`.
    ///
    /// Zero for fewer than two samples.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "sample counts stay far below 2^52")]
    pub fn population_variance(&self) -> f64 {
        if self.count <= 1 {
            return 0.0;
        }
        (self.centered_sum_of_squares() / (self.count - 1) as f64).max(0.0)
    }

    /// Returns the variance of the recorded samples themselves, dividing by `count`.
    ///
    /// Zero for fewer than two samples.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "sample counts stay far below 2^52")]
    pub fn variance(&self) -> f64 {
        if self.count <= 1 {
            return 0.0;
        }
        (self.centered_sum_of_squares() / self.count as f64).max(0.0)
    }

    /// Returns the square root of [`population_variance`](Self::population_variance).
    #[must_use]
    pub fn population_std_dev(&self) -> f64 {
        self.population_variance().sqrt()
    }

    /// Returns the square root of [`variance`](Self::variance).
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    // Rounding can push this slightly below zero for near-constant samples; callers clamp.
    fn centered_sum_of_squares(&self) -> f64 {
        self.sum_of_squares - self.sum * self.mean()
    }

    fn from_reply(reply: Reply) -> Result<Self> {
        let fields = reply.into_array()?;
        let [n, sum, sum_of_squares, min, max] = <[Reply; 5]>::try_from(fields)
            .map_err(|fields| Error::protocol(format!("expected 5 statistics fields, got {}", fields.len())))?;

        let count = match n {
            Reply::Nil => 0,
            other => u64::try_from(other.as_i64()?).map_err(Error::protocol)?,
        };

        Ok(Self {
            count,
            sum: sum.as_f64()?,
            sum_of_squares: sum_of_squares.as_f64()?,
            min: min.as_f64()?,
            max: max.as_f64()?,
        })
    }
}

/// Records samples under a key and reads back their statistics.
///
/// # Examples
///
/// ```
/// use cairn::{Context, Endpoint, EndpointPool, StatisticsAggregator, Topology};
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::initialize(Topology::single(pool), Clock::new_frozen()).await?;
///
/// let latency = StatisticsAggregator::new(ctx);
/// for sample in [12.0, 15.0, 9.0] {
///     latency.record("latency:checkout", sample).await?;
/// }
///
/// let stats = latency.read("latency:checkout").await?;
/// assert_eq!(stats.count, 3);
/// assert_eq!(stats.mean(), 12.0);
/// assert_eq!(stats.min, 9.0);
/// # Ok::<(), cairn::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct StatisticsAggregator<S> {
    ctx: Context<S>,
}

impl<S> Clone for StatisticsAggregator<S> {
    fn clone(&self) -> Self {
        Self { ctx: self.ctx.clone() }
    }
}

impl<S: RemoteStore> StatisticsAggregator<S> {
    /// Creates an aggregator.
    #[must_use]
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Folds `value` into the statistics at `key` on every owning pool and returns the
    /// primary's new sample count.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn record(&self, key: &str, value: f64) -> Result<u64> {
        // Floats travel as text so nothing is truncated on the way into the store.
        let args = [value.to_string(), (value * value).to_string()];
        let mut count = None;
        for pool in self.ctx.topology().owners_for(key) {
            let reply = self.ctx.eval(pool.write()?, &procedure::STATS_RECORD, &[key], &args).await?;
            if count.is_none() {
                count = Some(u64::try_from(reply.as_i64()?).map_err(Error::protocol)?);
            }
        }
        count.ok_or_else(|| Error::configuration("topology has no pools"))
    }

    /// Reads the statistics at `key` from the primary owner.
    ///
    /// # Errors
    ///
    /// Returns a store error, or a protocol error if the stored fields are malformed.
    pub async fn read(&self, key: &str) -> Result<Statistics> {
        let endpoint = self.ctx.topology().primary_for(key)?.next_read()?;
        let reply = self.ctx.eval(endpoint, &procedure::STATS_READ, &[key], &[]).await?;
        Statistics::from_reply(reply)
    }

    /// Deletes the statistics at `key` on every owning pool.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn reset(&self, key: &str) -> Result<()> {
        for pool in self.ctx.topology().owners_for(key) {
            pool.write()?.store().del(&[key]).await?;
        }
        Ok(())
    }
}
