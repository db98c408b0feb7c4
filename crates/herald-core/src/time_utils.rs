/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns true when `last_activity_unix_ms` lies at least `max_idle_ms`
/// behind `now_unix_ms`. A last-activity stamp in the future never expires.
pub fn is_idle_expired(last_activity_unix_ms: u64, now_unix_ms: u64, max_idle_ms: u64) -> bool {
    now_unix_ms.saturating_sub(last_activity_unix_ms) >= max_idle_ms
        && now_unix_ms > last_activity_unix_ms
}
