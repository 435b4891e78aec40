// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translation between `redis` types and the store boundary types.

use cairn_store::{Error, Reply, Result, Ttl};
use redis::{RedisError, Value};

/// Classifies a `redis` failure.
///
/// Connection-level failures become transport errors so they are retryable; a
/// forgotten script becomes a missing procedure; anything else means the server
/// rejected or answered the command in a way we cannot use.
pub(crate) fn error(error: RedisError) -> Error {
    if error.kind() == redis::ErrorKind::NoScriptError {
        Error::procedure_missing(error)
    } else if error.is_io_error() || error.is_timeout() || error.is_connection_dropped() || error.is_connection_refusal() {
        Error::transport(error)
    } else {
        Error::protocol(error)
    }
}

pub(crate) fn reply(value: Value) -> Result<Reply> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Int(value) => Ok(Reply::Int(value)),
        Value::BulkString(bytes) => Ok(Reply::Bulk(bytes)),
        Value::SimpleString(text) => Ok(Reply::Status(text)),
        Value::Okay => Ok(Reply::Status("OK".to_owned())),
        Value::Double(value) => Ok(Reply::Bulk(value.to_string().into_bytes())),
        Value::Boolean(flag) => Ok(Reply::Int(i64::from(flag))),
        Value::Array(items) | Value::Set(items) => items.into_iter().map(reply).collect::<Result<Vec<_>>>().map(Reply::Array),
        other => Err(Error::protocol(format!("unsupported reply from redis: {other:?}"))),
    }
}

/// Interprets a `PTTL` reply: `-2` is a missing key, `-1` a key without expiry.
pub(crate) fn ttl(millis: i64) -> Result<Ttl> {
    match millis {
        -2 => Ok(Ttl::Missing),
        -1 => Ok(Ttl::Persistent),
        _ => u64::try_from(millis)
            .map(|remaining| Ttl::Remaining(std::time::Duration::from_millis(remaining)))
            .map_err(|_| Error::protocol(format!("unexpected PTTL reply {millis}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cairn_store::ErrorKind;

    use super::*;

    #[test]
    fn noscript_maps_to_missing_procedure() {
        let source = RedisError::from((redis::ErrorKind::NoScriptError, "NOSCRIPT No matching script"));
        assert_eq!(error(source).kind(), ErrorKind::ProcedureMissing);
    }

    #[test]
    fn io_failure_maps_to_transport() {
        let source = RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(error(source).kind(), ErrorKind::Transport);
    }

    #[test]
    fn server_rejection_maps_to_protocol() {
        let source = RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        assert_eq!(error(source).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn nested_arrays_are_converted() {
        let value = Value::Array(vec![
            Value::Int(3),
            Value::BulkString(b"12.5".to_vec()),
            Value::Nil,
            Value::Array(vec![Value::Okay]),
        ]);
        let converted = reply(value).expect("supported reply");
        assert_eq!(
            converted,
            Reply::Array(vec![
                Reply::Int(3),
                Reply::Bulk(b"12.5".to_vec()),
                Reply::Nil,
                Reply::Array(vec![Reply::Status("OK".to_owned())]),
            ])
        );
    }

    #[test]
    fn resp3_scalars_are_converted() {
        assert_eq!(reply(Value::Boolean(true)).expect("bool"), Reply::Int(1));
        let double = reply(Value::Double(2.5)).expect("double");
        assert!((double.as_f64().expect("float") - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn pttl_tells_missing_from_persistent() {
        assert_eq!(ttl(-2).expect("missing"), Ttl::Missing);
        assert_eq!(ttl(-1).expect("persistent"), Ttl::Persistent);
        assert_eq!(ttl(0).expect("remaining"), Ttl::Remaining(Duration::ZERO));
        assert_eq!(ttl(1500).expect("remaining"), Ttl::Remaining(Duration::from_millis(1500)));
        assert_eq!(ttl(-7).expect_err("out of range").kind(), ErrorKind::Protocol);
    }
}
