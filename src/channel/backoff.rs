//! Reconnect backoff policy.
//!
//! Pure functions, no side effects. The delay before the `(n+1)`-th
//! reconnect attempt is `base * 2^n` with no jitter, and no automatic
//! attempt happens once the attempt counter reaches the maximum.

use std::time::Duration;

/// Delay before the next reconnect attempt.
///
/// # Arguments
///
/// * `base` - Base delay (1 second in production)
/// * `attempt` - Number of reconnect attempts already made (0-indexed)
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let millis = (base.as_millis() as u64).saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    Duration::from_millis(millis)
}

/// Whether another automatic reconnect attempt is allowed.
///
/// # Arguments
///
/// * `attempts` - Number of reconnect attempts already made
/// * `max_attempts` - Maximum automatic attempts before giving up
pub fn should_attempt_reconnect(attempts: u32, max_attempts: u32) -> bool {
    attempts < max_attempts
}
