//! Small shared helpers.

use chrono::{SecondsFormat, Utc};

/// Milliseconds since the Unix epoch, the timestamp unit used in every
/// envelope and response body.
pub fn current_timestamp() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Current UTC time as an ISO-8601 string with millisecond precision,
/// e.g. `2024-05-01T12:00:00.000Z`.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
