/*
 * Copyright (c) 2025 Bifrost Contributors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Protocol timestamp conversion.
//!
//! Every timestamp on the wire is an unsigned 64-bit nanosecond count since
//! the Unix epoch. Wall-clock values before the epoch (or outside chrono's
//! nanosecond range) are rejected as typed errors rather than clamped.

use chrono::{DateTime, Utc};

/// Error converting a wall-clock value into a protocol timestamp.
#[derive(Debug, PartialEq, Eq)]
pub enum TimeError {
    /// The instant predates the Unix epoch.
    Negative,
    /// The instant cannot be represented as nanoseconds in an i64.
    OutOfRange,
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Negative => write!(f, "timestamp predates the Unix epoch"),
            TimeError::OutOfRange => write!(f, "timestamp exceeds the nanosecond range"),
        }
    }
}

impl std::error::Error for TimeError {}

/// Converts a wall-clock instant to protocol nanoseconds.
pub fn to_unix_nano(t: &DateTime<Utc>) -> Result<u64, TimeError> {
    let nanos = t.timestamp_nanos_opt().ok_or(TimeError::OutOfRange)?;
    u64::try_from(nanos).map_err(|_| TimeError::Negative)
}
