// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Tiered near/far caching with remote atomic data structures.
//!
//! This crate sits between application code and a shared key-value store such as Redis
//! and provides:
//! - [`TieredCache`]: a process-local near tier in front of the shared far tier, with
//!   absolute or sliding expiration that both tiers interpret the same way
//! - [`BloomFilter`], [`RateLimiter`] and [`StatisticsAggregator`]: data structures whose
//!   state lives in the store and is updated by atomic server-side procedures
//! - [`InvalidationBus`]: publish/subscribe with per-key callbacks and automatic
//!   resubscription
//! - [`ReplicatedConfigStore`]: cluster-wide settings that invalidate local copies
//!   when they change
//!
//! Every component is built from a [`Context`], which owns the endpoint [`Topology`], the
//! [`ProcedureRegistry`], the clock and this process's node identity.
//!
//! # Topology
//!
//! Endpoints are grouped into [`EndpointPool`]s of one write endpoint and any number of
//! read replicas. A [`ShardPolicy`] decides which pools own a key: mutations go to every
//! owner, reads go to the first.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use cairn::{Context, Endpoint, EndpointPool, RateLimiter, StatisticsAggregator, Topology};
//! use cairn_store::testing::InMemoryStore;
//! use tick::Clock;
//! # futures::executor::block_on(async {
//!
//! let mut pool = EndpointPool::new("main");
//! pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
//! let ctx = Context::initialize(Topology::single(pool), Clock::new_frozen()).await?;
//!
//! let limiter = RateLimiter::new(ctx.clone());
//! let outcome = limiter
//!     .increment("api:tenant-7", Duration::from_secs(60), Duration::from_secs(5), 100, 1)
//!     .await?;
//! assert_eq!(outcome.total, 1);
//!
//! let stats = StatisticsAggregator::new(ctx);
//! stats.record("payload:bytes", 512.0).await?;
//! assert_eq!(stats.read("payload:bytes").await?.count, 1);
//! # Ok::<(), cairn::Error>(())
//! # });
//! ```
//!
//! # Features
//!
//! - `metrics`: count cache events with an OpenTelemetry meter, see `TieredCache::with_meter`
//! - `test-util`: enables `cairn_store::testing` and the controllable `tick` clocks for downstream tests

mod bloom;
mod bus;
mod config_store;
mod context;
mod endpoint;
pub mod options;
mod rate_limit;
mod registry;
mod statistics;
mod telemetry;
mod tiered;
mod topology;
mod value;

#[doc(inline)]
pub use bloom::{BloomFilter, BloomOptions};
#[doc(inline)]
pub use bus::{BusState, Callback, InvalidationBus};
#[doc(inline)]
pub use cairn_store::{Codec, Error, ErrorKind, Expiration, Result};
#[doc(inline)]
pub use config_store::{CHANGED_CHANNEL, REMOVED_CHANNEL, ReplicatedConfigStore};
#[doc(inline)]
pub use context::Context;
#[doc(inline)]
pub use endpoint::{Endpoint, EndpointPool};
#[doc(inline)]
pub use options::{BusOptions, ConfigStoreOptions, PoolOptions, TieredCacheOptions, TopologyOptions};
#[doc(inline)]
pub use rate_limit::{RateLimitOutcome, RateLimiter};
#[doc(inline)]
pub use registry::ProcedureRegistry;
#[doc(inline)]
pub use statistics::{Statistics, StatisticsAggregator};
#[doc(inline)]
pub use tiered::{Target, TieredCache};
#[doc(inline)]
pub use topology::{ShardPolicy, Topology};
#[doc(inline)]
pub use value::MemoryValue;
