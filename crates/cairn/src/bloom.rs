// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A bloom filter whose bit array lives in the shared store.

use std::f64::consts::LN_2;

use cairn_store::{Error, RemoteStore, Result, procedure};
use xxhash_rust::xxh3::Xxh3;

use crate::Context;

// Largest bitmap a Redis string can hold (512 MiB).
const MAX_BITS: u64 = 1 << 32;

/// Size of a bloom filter, derived from the expected cardinality and the acceptable
/// false positive rate.
///
/// Every process writing or reading a filter key must use the same options.
///
/// # Examples
///
/// ```
/// use cairn::BloomOptions;
///
/// let options = BloomOptions::new(1_000, 0.01)?;
/// assert_eq!(options.bits(), 9_586);
/// assert_eq!(options.hashes(), 7);
/// # Ok::<(), cairn::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomOptions {
    expected_items: u64,
    false_positive_rate: f64,
    bits: u64,
    hashes: u32,
}

impl BloomOptions {
    /// Computes the optimal bit count and hash count.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `expected_items` is zero, if
    /// `false_positive_rate` is not strictly between 0 and 1, or if the filter would not
    /// fit in a single store value.
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "sizes are positive, rounded and bounded by MAX_BITS"
    )]
    pub fn new(expected_items: u64, false_positive_rate: f64) -> Result<Self> {
        if expected_items == 0 {
            return Err(Error::configuration("bloom filter needs at least one expected item"));
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(Error::configuration(format!(
                "bloom filter false positive rate must be in (0, 1), got {false_positive_rate}"
            )));
        }

        let n = expected_items as f64;
        let bits = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil().max(1.0);
        if bits > MAX_BITS as f64 {
            return Err(Error::configuration(format!("bloom filter of {bits} bits exceeds the store value limit")));
        }
        let hashes = (LN_2 * bits / n).round().max(1.0);

        Ok(Self {
            expected_items,
            false_positive_rate,
            bits: bits as u64,
            hashes: hashes as u32,
        })
    }

    /// Returns the design cardinality.
    #[must_use]
    pub fn expected_items(&self) -> u64 {
        self.expected_items
    }

    /// Returns the target false positive rate at the design cardinality.
    #[must_use]
    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// Returns the size of the bit array.
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Returns the number of bit positions per value.
    #[must_use]
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    /// Returns the bit positions for `value`.
    #[must_use]
    pub fn offsets(&self, value: &[u8]) -> Vec<u64> {
        (0..self.hashes)
            .map(|i| {
                let mut hasher = Xxh3::new();
                hasher.update(value);
                hasher.update(&i.to_le_bytes());
                hasher.digest() % self.bits
            })
            .collect()
    }

    fn offset_args(&self, value: &[u8]) -> Vec<String> {
        self.offsets(value).into_iter().map(|offset| offset.to_string()).collect()
    }
}

/// A probabilistic set stored remotely, one bit array per key.
///
/// Adding sets all of a value's bits in one atomic round trip, and checking tests them
/// in one round trip, so concurrent writers in different processes never observe a
/// half-added value. There are no false negatives for values added successfully.
///
/// # Examples
///
/// ```
/// use cairn::{BloomFilter, Context, Endpoint, EndpointPool, Topology};
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::initialize(Topology::single(pool), Clock::new_frozen()).await?;
///
/// let seen = BloomFilter::new(ctx, 10_000, 0.001)?;
/// seen.add("seen:urls", "https://example.com").await?;
///
/// assert!(seen.is_set("seen:urls", "https://example.com").await?);
/// # Ok::<(), cairn::Error>(())
/// # });
/// ```
#[derive(Debug)]
pub struct BloomFilter<S> {
    ctx: Context<S>,
    options: BloomOptions,
}

impl<S> Clone for BloomFilter<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            options: self.options,
        }
    }
}

impl<S: RemoteStore> BloomFilter<S> {
    /// Creates a filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid sizing, see [`BloomOptions::new`].
    pub fn new(ctx: Context<S>, expected_items: u64, false_positive_rate: f64) -> Result<Self> {
        Ok(Self::with_options(ctx, BloomOptions::new(expected_items, false_positive_rate)?))
    }

    /// Creates a filter with precomputed options.
    #[must_use]
    pub fn with_options(ctx: Context<S>, options: BloomOptions) -> Self {
        Self { ctx, options }
    }

    /// Returns the filter options.
    #[must_use]
    pub fn options(&self) -> &BloomOptions {
        &self.options
    }

    /// Adds `value` to the filter at `key` on every pool that owns the key.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn add(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let args = self.options.offset_args(value.as_ref());
        for pool in self.ctx.topology().owners_for(key) {
            self.ctx.eval(pool.write()?, &procedure::BLOOM_ADD, &[key], &args).await?;
        }
        Ok(())
    }

    /// Adds every value in `values`.
    ///
    /// # Errors
    ///
    /// Returns the first store error; values before it have been added.
    pub async fn add_many<I>(&self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        for value in values {
            self.add(key, value).await?;
        }
        Ok(())
    }

    /// Returns `true` if `value` may have been added to the filter at `key`, and
    /// `false` if it definitely was not.
    ///
    /// The check runs on the primary pool's write endpoint, the one [`add`](Self::add)
    /// wrote to, so a lagging read replica cannot turn a member into a false negative.
    ///
    /// # Errors
    ///
    /// Returns a store error, or a configuration error if the topology is empty.
    pub async fn is_set(&self, key: &str, value: impl AsRef<[u8]>) -> Result<bool> {
        let args = self.options.offset_args(value.as_ref());
        let endpoint = self.ctx.topology().primary_for(key)?.write()?;
        self.ctx.eval(endpoint, &procedure::BLOOM_CHECK, &[key], &args).await?.as_bool()
    }
}
