//! Time utilities
//!
//! Persisted timestamps are Unix milliseconds so they survive restarts and
//! compare without timezone handling.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
///
/// # Examples
/// ```
/// use pb_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Elapsed milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Whether a timestamp is older than `max_age` relative to `now`.
///
/// A missing timestamp is always stale.
pub fn is_stale(timestamp: Option<u64>, max_age: Duration, now: u64) -> bool {
    match timestamp {
        Some(ts) => now.saturating_sub(ts) > max_age.as_millis() as u64,
        None => true,
    }
}
