// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Redis far tier for cairn.
//!
//! [`RedisStore`] implements [`cairn_store::RemoteStore`] on top of the `redis` crate:
//! commands run over a multiplexed [`ConnectionManager`](redis::aio::ConnectionManager)
//! that reconnects on its own, procedures are installed with `SCRIPT LOAD` and invoked
//! with `EVALSHA`, and every subscription gets a dedicated pub/sub connection whose
//! message stream ends when the connection drops.
//!
//! # Example
//!
//! ```no_run
//! use cairn_redis::RedisStore;
//! use cairn_store::RemoteStore;
//! use tick::Clock;
//!
//! # async fn example() -> cairn_store::Result<()> {
//! let store = RedisStore::connect("redis://127.0.0.1:6379", &Clock::new_tokio()).await?;
//! store.set("greeting", b"hello", None).await?;
//! # Ok(())
//! # }
//! ```

mod convert;
mod options;
mod store;

#[doc(inline)]
pub use options::ConnectOptions;
#[doc(inline)]
pub use store::RedisStore;
