/// Jobs are keyed by an external string identifier such as `"JOB-4821"`.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Convert a timestamp to the epoch-millisecond representation both stores
/// persist.
pub fn to_epoch_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Convert epoch milliseconds back to a timestamp.
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_epoch_millis(millis: i64) -> Option<Timestamp> {
    chrono::DateTime::from_timestamp_millis(millis)
}

/// The current time truncated to millisecond precision, so a value survives
/// a round trip through either store unchanged.
pub fn now_millis() -> Timestamp {
    let now = chrono::Utc::now();
    from_epoch_millis(now.timestamp_millis()).unwrap_or(now)
}
