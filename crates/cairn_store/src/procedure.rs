// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The catalog of atomic procedures cairn runs inside the store.
//!
//! Every procedure executes as one indivisible unit on the store, which is what makes
//! the bloom filter, rate limiter and statistics aggregator correct under concurrent
//! writers from many processes. The sources are Lua, as understood by Redis `EVAL`.
//!
//! Argument conventions are part of the contract: [`RemoteStore`](crate::RemoteStore)
//! implementations that do not speak Lua (such as the in-memory fake) must reproduce the
//! same semantics for the same keys and arguments.

use std::fmt::{self, Debug, Formatter};

/// A server-side routine the store runs atomically.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Procedure {
    name: &'static str,
    source: &'static str,
}

impl Procedure {
    const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    /// Returns the stable name of the procedure.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the Lua source of the procedure.
    #[must_use]
    pub fn source(&self) -> &'static str {
        self.source
    }
}

impl Debug for Procedure {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A handle to a procedure installed on one store endpoint.
///
/// The digest is whatever the store uses to address an installed procedure; for Redis
/// that is the SHA1 of the script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureHandle {
    name: &'static str,
    digest: String,
}

impl ProcedureHandle {
    /// Creates a handle for an installed procedure.
    #[must_use]
    pub fn new(procedure: &Procedure, digest: impl Into<String>) -> Self {
        Self {
            name: procedure.name,
            digest: digest.into(),
        }
    }

    /// Returns the name of the procedure this handle refers to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the store-specific digest of the installed procedure.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Sets every bit offset in `ARGV` on the bit array at `KEYS[1]`. Returns `1`.
pub const BLOOM_ADD: Procedure = Procedure::new(
    "bloom.add",
    r"
for i = 1, #ARGV do
  redis.call('SETBIT', KEYS[1], ARGV[i], 1)
end
return 1
",
);

/// Returns `1` when every bit offset in `ARGV` is set on the bit array at `KEYS[1]`, else `0`.
pub const BLOOM_CHECK: Procedure = Procedure::new(
    "bloom.check",
    r"
for i = 1, #ARGV do
  if redis.call('GETBIT', KEYS[1], ARGV[i]) == 0 then
    return 0
  end
end
return 1
",
);

/// Sliding-window increment on the bucket hash at `KEYS[1]`.
///
/// `ARGV` is `now_ms, window_ms, bucket_ms, limit, amount`. Adds `amount` to the bucket
/// containing `now`, drops buckets starting before `now - window`, refreshes the key
/// expiry to `window + bucket` and returns the in-window total. `limit` is carried for
/// stricter variants and ignored here.
pub const RATE_LIMIT_INCREMENT: Procedure = Procedure::new(
    "rate_limit.increment",
    r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local bucket = tonumber(ARGV[3])
local amount = tonumber(ARGV[5])
local current = string.format('%d', now - (now % bucket))
redis.call('HINCRBY', KEYS[1], current, amount)
local cutoff = now - window
local total = 0
local fields = redis.call('HGETALL', KEYS[1])
for i = 1, #fields, 2 do
  if tonumber(fields[i]) < cutoff then
    redis.call('HDEL', KEYS[1], fields[i])
  else
    total = total + tonumber(fields[i + 1])
  end
end
redis.call('PEXPIRE', KEYS[1], window + bucket)
return total
",
);

/// Folds one sample into the running statistics hash at `KEYS[1]`.
///
/// `ARGV` is `value, value * value`, both as decimal strings so no precision is lost
/// crossing into Lua. Returns the new sample count.
pub const STATS_RECORD: Procedure = Procedure::new(
    "stats.record",
    r"
local value = tonumber(ARGV[1])
local n = redis.call('HINCRBY', KEYS[1], 'n', 1)
redis.call('HINCRBYFLOAT', KEYS[1], 'sum', ARGV[1])
redis.call('HINCRBYFLOAT', KEYS[1], 'sumsq', ARGV[2])
local min = redis.call('HGET', KEYS[1], 'min')
if not min or value < tonumber(min) then
  redis.call('HSET', KEYS[1], 'min', ARGV[1])
end
local max = redis.call('HGET', KEYS[1], 'max')
if not max or value > tonumber(max) then
  redis.call('HSET', KEYS[1], 'max', ARGV[1])
end
return n
",
);

/// Reads the running statistics hash at `KEYS[1]` as `n, sum, sumsq, min, max`.
///
/// Missing fields come back as nil.
pub const STATS_READ: Procedure = Procedure::new(
    "stats.read",
    r"
return redis.call('HMGET', KEYS[1], 'n', 'sum', 'sumsq', 'min', 'max')
",
);

/// Every procedure in the catalog, in installation order.
pub const ALL: [Procedure; 5] = [BLOOM_ADD, BLOOM_CHECK, RATE_LIMIT_INCREMENT, STATS_RECORD, STATS_READ];
