// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value codecs.
//!
//! A [`Codec`] turns typed values into the bytes stored in either tier and back. Codecs
//! are swappable without changing cache semantics: a cache written with one codec must
//! simply be read with the same one.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Encodes and decodes values of type `T`.
pub trait Codec<T>: Send + Sync {
    /// Encodes a value into bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the value cannot be represented.
    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    /// Decodes a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Passes bytes through unchanged.
///
/// ```
/// use cairn_store::{Codec, RawCodec};
///
/// let bytes = RawCodec.encode(&b"payload".to_vec())?;
/// assert_eq!(bytes, b"payload");
/// # Ok::<(), cairn_store::Error>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

impl Codec<String> for RawCodec {
    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(Error::codec)
    }
}

/// Self-describing JSON encoding via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Error::codec)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(Error::codec)
    }
}

/// Compact binary encoding via `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> Codec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(Error::codec)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(Error::codec)
    }
}

/// Wraps another codec with zstd compression.
///
/// ```
/// use cairn_store::{Codec, Compressed, JsonCodec};
///
/// let codec = Compressed::new(JsonCodec);
/// let value = "a".repeat(1024);
/// let bytes = codec.encode(&value)?;
/// assert!(bytes.len() < value.len());
/// assert_eq!(Codec::<String>::decode(&codec, &bytes)?, value);
/// # Ok::<(), cairn_store::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Compressed<C> {
    inner: C,
    level: i32,
}

impl<C> Compressed<C> {
    /// Default zstd compression level.
    pub const DEFAULT_LEVEL: i32 = 3;

    /// Wraps `inner` using the default compression level.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self::with_level(inner, Self::DEFAULT_LEVEL)
    }

    /// Wraps `inner` using an explicit compression level.
    #[must_use]
    pub fn with_level(inner: C, level: i32) -> Self {
        Self { inner, level }
    }
}

impl<T, C> Codec<T> for Compressed<C>
where
    C: Codec<T>,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let raw = self.inner.encode(value)?;
        zstd::encode_all(raw.as_slice(), self.level).map_err(Error::codec)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        let raw = zstd::decode_all(bytes).map_err(Error::codec)?;
        self.inner.decode(&raw)
    }
}
