//! Millisecond timestamps.
//!
//! Every timestamp that crosses a crate boundary is an `i64` count of
//! milliseconds since the Unix epoch, matching the SQLite `INTEGER` columns
//! it is persisted in.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Convert a transport timestamp in seconds to milliseconds.
#[must_use]
pub fn secs_to_ms(secs: i64) -> i64 {
    secs.saturating_mul(1000)
}

/// Render a millisecond timestamp as RFC 3339 (UTC, second precision).
///
/// Out-of-range values fall back to the raw integer so a corrupt row never
/// breaks context rendering.
#[must_use]
pub fn format_rfc3339(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ts_ms.to_string())
}
