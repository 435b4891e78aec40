// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Boundary abstractions between the cairn caching client and the shared store.
//!
//! This crate defines the [`RemoteStore`] trait that every far-tier backend must satisfy,
//! the [`Procedure`] catalog of atomic server-side routines the client relies on, the
//! [`Codec`] boundary used to turn typed values into stored bytes, and the [`Error`]
//! type shared by all cairn crates.
//!
//! # Overview
//!
//! The store abstraction separates transport concerns from caching features. Implement
//! [`RemoteStore`] for your backend (the `cairn_redis` crate does this for Redis), then use
//! `cairn` to get tiered caching, bloom filters, rate limiting, running statistics and
//! cross-process invalidation on top.
//!
//! # Codecs
//!
//! ```
//! use cairn_store::{Codec, JsonCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&vec![1_u32, 2, 3])?;
//! let back: Vec<u32> = codec.decode(&bytes)?;
//! assert_eq!(back, vec![1, 2, 3]);
//! # Ok::<(), cairn_store::Error>(())
//! ```
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::InMemoryStore`], a process-local fake that
//! implements the whole boundary, including the procedure catalog and publish/subscribe.

pub mod codec;
pub mod error;
mod expiration;
pub mod procedure;
mod reply;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use codec::{BincodeCodec, Codec, Compressed, JsonCodec, RawCodec};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use expiration::{Expiration, Ttl};
#[doc(inline)]
pub use procedure::{Procedure, ProcedureHandle};
#[doc(inline)]
pub use reply::Reply;
#[doc(inline)]
pub use store::{Message, MessageStream, RemoteStore};
