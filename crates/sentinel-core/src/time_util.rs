//! UTC time utilities.
//!
//! Every timestamp in the workspace is a `DateTime<Utc>`. On the wire (CSV,
//! health JSON, log fields) timestamps are ISO-8601 with millisecond
//! precision and a `Z` suffix.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current wall-clock time in UTC.
#[inline]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp as ISO-8601, e.g. `2024-03-01T12:00:00.000Z`.
#[inline]
pub fn to_iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
