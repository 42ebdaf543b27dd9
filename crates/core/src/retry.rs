//! Retry budget decisions and exponential backoff for failed generations.

use std::time::Duration;

/// Base delay for the first retry backoff.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound on the retry backoff delay.
pub const BACKOFF_CAP_MS: u64 = 30_000;

/// Default retry budget for a new job.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// What to do with a job after an adapter or poll failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retryable and budget remains: requeue with an incremented count.
    Requeue,
    /// Not retryable, or retries exhausted: terminal failure plus refund.
    Fail,
}

/// Decide whether a failed job goes back to the queue or fails permanently.
///
/// A job at `retry_count == max_retries` has spent its budget — even a
/// retryable failure becomes terminal.
pub fn decide(retryable: bool, retry_count: i32, max_retries: i32) -> RetryDecision {
    if retryable && retry_count < max_retries {
        RetryDecision::Requeue
    } else {
        RetryDecision::Fail
    }
}

/// Backoff delay before the worker returns a requeued job to the pool:
/// `min(1000 * 2^retry_count, 30000)` ms.
pub fn backoff_delay(retry_count: i32) -> Duration {
    let exp = retry_count.clamp(0, 31) as u32;
    let ms = BACKOFF_BASE_MS
        .checked_shl(exp)
        .unwrap_or(BACKOFF_CAP_MS)
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- decide --

    #[test]
    fn retryable_with_budget_requeues() {
        assert_eq!(decide(true, 0, 3), RetryDecision::Requeue);
        assert_eq!(decide(true, 2, 3), RetryDecision::Requeue);
    }

    #[test]
    fn retryable_with_exhausted_budget_fails() {
        assert_eq!(decide(true, 3, 3), RetryDecision::Fail);
        assert_eq!(decide(true, 4, 3), RetryDecision::Fail);
    }

    #[test]
    fn non_retryable_always_fails() {
        assert_eq!(decide(false, 0, 3), RetryDecision::Fail);
    }

    #[test]
    fn zero_budget_fails_immediately() {
        assert_eq!(decide(true, 0, 0), RetryDecision::Fail);
    }

    // -- backoff_delay --

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(16_000));
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay(5), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn backoff_survives_absurd_counts() {
        assert_eq!(backoff_delay(1_000), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(-5), Duration::from_millis(1_000));
    }
}
