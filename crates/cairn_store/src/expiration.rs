// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long an entry stays alive in a tier.
///
/// Both tiers interpret the policy the same way so that a value written to both
/// expires at roughly the same time in each.
///
/// # Examples
///
/// ```
/// use cairn_store::Expiration;
/// use std::time::Duration;
///
/// let absolute = Expiration::Absolute(Duration::from_secs(60));
/// assert_eq!(absolute.duration(), Some(Duration::from_secs(60)));
/// assert!(!absolute.is_sliding());
///
/// assert_eq!(Expiration::None.duration(), None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    /// The entry never expires on its own.
    #[default]
    None,
    /// The entry expires a fixed time after it was written.
    Absolute(Duration),
    /// The entry expires after it has not been read for the given time.
    Sliding(Duration),
}

impl Expiration {
    /// Returns the time-to-live this policy grants from the moment of the last write or read.
    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Absolute(ttl) | Self::Sliding(ttl) => Some(ttl),
        }
    }

    /// Returns `true` for sliding expiration.
    #[must_use]
    pub fn is_sliding(self) -> bool {
        matches!(self, Self::Sliding(_))
    }
}

impl From<Option<Duration>> for Expiration {
    fn from(ttl: Option<Duration>) -> Self {
        ttl.map_or(Self::None, Self::Absolute)
    }
}

/// The remaining lifetime of a key as reported by a [`RemoteStore`](crate::RemoteStore).
///
/// A missing key and a key without expiry are reported separately so that callers
/// copying an entry between tiers never mistake a vanished entry for a persistent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires on its own.
    Persistent,
    /// The key exists and expires after the given time.
    Remaining(Duration),
}

impl Ttl {
    /// Returns the expiration a copy of the entry should carry, or `None` when the key is missing.
    #[must_use]
    pub fn expiration(self) -> Option<Expiration> {
        match self {
            Self::Missing => None,
            Self::Persistent => Some(Expiration::None),
            Self::Remaining(ttl) => Some(Expiration::Absolute(ttl)),
        }
    }

    /// Returns the remaining time, if the key exists and has an expiry.
    #[must_use]
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Remaining(ttl) => Some(ttl),
            Self::Missing | Self::Persistent => None,
        }
    }
}
