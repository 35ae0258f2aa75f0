use chrono::Utc;

/// Milliseconds since the unix epoch, the timestamp unit used on the wire
/// and in every persisted record.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}
