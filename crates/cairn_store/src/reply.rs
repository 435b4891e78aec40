// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Error, Result};

/// A reply returned by a procedure evaluation.
///
/// This mirrors the small set of value shapes an atomic procedure can return.
/// Conversions are lenient in the same way the store is: integers may arrive as
/// bulk strings and floats always do.
///
/// # Examples
///
/// ```
/// use cairn_store::Reply;
///
/// assert_eq!(Reply::Int(7).as_i64()?, 7);
/// assert_eq!(Reply::Bulk(b"2.5".to_vec()).as_f64()?, 2.5);
/// assert!(Reply::Int(1).as_bool()?);
/// # Ok::<(), cairn_store::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No value.
    Nil,
    /// An integer.
    Int(i64),
    /// Binary-safe bytes.
    Bulk(Vec<u8>),
    /// A status line such as `OK`.
    Status(String),
    /// A nested list of replies.
    Array(Vec<Self>),
}

impl Reply {
    /// Interprets the reply as an integer.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the reply is not an integer or a numeric string.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Bulk(bytes) => parse_text(bytes),
            Self::Status(text) => parse_text(text.as_bytes()),
            other => Err(Error::protocol(format!("expected integer reply, got {other:?}"))),
        }
    }

    /// Interprets the reply as a float. `Nil` is read as `0.0`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the reply is not numeric.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Self::Nil => Ok(0.0),
            #[expect(clippy::cast_precision_loss, reason = "procedure counters stay far below 2^52")]
            Self::Int(value) => Ok(*value as f64),
            Self::Bulk(bytes) => parse_text(bytes),
            Self::Status(text) => parse_text(text.as_bytes()),
            Self::Array(_) => Err(Error::protocol("expected numeric reply, got array")),
        }
    }

    /// Interprets the reply as a boolean flag (`1` / `0`).
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the reply is not an integer.
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_i64()? != 0)
    }

    /// Returns the elements of an array reply.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the reply is not an array.
    pub fn into_array(self) -> Result<Vec<Self>> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(Error::protocol(format!("expected array reply, got {other:?}"))),
        }
    }
}

fn parse_text<T: std::str::FromStr>(bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes).map_err(Error::protocol)?;
    text.trim()
        .parse()
        .map_err(|_parse| Error::protocol(format!("expected numeric reply, got {text:?}")))
}
