//! Retry backoff ladder and domain circuit-breaker thresholds

use chrono::Duration;

/// Consecutive failures at which a domain's block window starts.
pub const DOMAIN_FAILURE_THRESHOLD: u32 = 3;

/// How long a tripped domain stays blocked.
pub fn domain_block_duration() -> Duration {
    Duration::hours(24)
}

/// Delay before the next attempt, given the attempt count after the failure
/// that just happened. `None` means the retry budget view of the ladder is
/// exhausted and the job is terminal.
pub fn backoff_delay(attempts: u32) -> Option<Duration> {
    match attempts {
        0 | 1 => Some(Duration::minutes(15)),
        2 => Some(Duration::hours(1)),
        3 => Some(Duration::hours(6)),
        _ => None,
    }
}

/// True once a domain's failure streak should trip the breaker.
pub fn should_block_domain(consecutive_failures: u32) -> bool {
    consecutive_failures >= DOMAIN_FAILURE_THRESHOLD
}
