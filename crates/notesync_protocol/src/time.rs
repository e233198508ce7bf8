//! Timestamps.

use chrono::{DateTime, SubsecRound, Utc};

/// A UTC instant. `updatedAt` comparisons use this type.
pub type Timestamp = DateTime<Utc>;

/// Returns the current time truncated to millisecond precision.
///
/// Servers exchange ISO-8601 strings with millisecond resolution, so local
/// stamps are truncated the same way to keep equality checks stable across a
/// JSON round trip.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}
