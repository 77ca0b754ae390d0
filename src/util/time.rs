use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to millisecond precision.
///
/// The store keeps timestamps as Unix milliseconds, so anything stamped with
/// this value survives a persist/load cycle unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Formats `ts` as an RFC 1123 HTTP date (`If-Modified-Since` style).
pub fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
