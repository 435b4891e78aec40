// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection establishment settings.
///
/// Only establishing a connection is retried. Commands are never replayed, since
/// a command that timed out may already have been applied.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cairn_redis::ConnectOptions;
///
/// let options = ConnectOptions::default();
/// assert_eq!(options.attempts, 3);
/// assert_eq!(options.initial_delay, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Total number of connection attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt. Doubles after every failure.
    pub initial_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
        }
    }
}
