//! Bounded retry policy shared by every upstream-calling client.
//!
//! One schedule for embeddings, completions, reranking, and the remote
//! vector store: exponential backoff 1s, 2s, 4s, 8s, 16s, 32s (capped),
//! retrying rate limits (429), server errors (5xx), and network failures.
//! Other client errors fail immediately.

use std::time::Duration;

/// Retry budget and backoff schedule for one upstream capability.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Backoff before the given attempt (attempt 0 is the first try and has
    /// no delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1 << (attempt - 1).min(5))
        }
    }

    /// Attempt numbers to iterate: `0..=max_retries`.
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        0..=self.max_retries
    }
}

/// Whether an HTTP status warrants another attempt.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_schedule_doubles_and_caps() {
        let policy = RetryPolicy::new(8);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(6), Duration::from_secs(32));
        // Capped at 2^5.
        assert_eq!(policy.delay(8), Duration::from_secs(32));
    }

    #[test]
    fn attempt_count_includes_first_try() {
        let policy = RetryPolicy::new(2);
        assert_eq!(policy.attempts().count(), 3);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert!(!is_retryable_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(reqwest::StatusCode::UNAUTHORIZED));
    }
}
