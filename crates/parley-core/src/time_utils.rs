use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns true once `now_unix_ms` is strictly past `deadline_unix_ms`.
pub fn is_past_deadline_ms(deadline_unix_ms: u64, now_unix_ms: u64) -> bool {
    now_unix_ms > deadline_unix_ms
}

/// Renders a unix millisecond timestamp as an RFC 3339 UTC string.
pub fn format_unix_ms_rfc3339(unix_ms: u64) -> String {
    let millis = i64::try_from(unix_ms).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|value| value.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| format!("unix_ms:{unix_ms}"))
}
