// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Process-local near tier backed by moka.
//!
//! This crate provides [`NearCache`], the in-process half of a cairn tiered cache. It
//! stores encoded bytes under string keys and honors per-entry absolute or sliding
//! expiration. Operations are synchronous since nothing here waits on I/O. Expiry is
//! evaluated against a [`tick::Clock`], so tests can move time forward deterministically.
//! Use [`NearCacheBuilder`] to configure capacity without exposing moka types.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use cairn_memory::NearCache;
//! use cairn_store::Expiration;
//! use tick::Clock;
//!
//! let cache = NearCache::builder(Clock::new_frozen()).max_capacity(1000).build();
//!
//! cache.insert("key", b"value".to_vec(), Expiration::Absolute(Duration::from_secs(60)));
//! assert_eq!(cache.get("key").as_deref(), Some(&b"value"[..]));
//! ```

pub mod builder;
pub mod tier;

#[doc(inline)]
pub use builder::{NearCacheBuilder, NearCacheOptions};
#[doc(inline)]
pub use tier::NearCache;
