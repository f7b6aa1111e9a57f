use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;

/// Retry policy configuration for activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Upper bound for the delay between attempts
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub backoff_coefficient: f64,
    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Whether a failed attempt number `attempt` (1-based) may be retried.
    /// Non-retryable error classes stop immediately.
    pub fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Delay before the attempt following attempt number `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let exponential_delay =
            self.initial_interval.as_millis() as f64 * self.backoff_coefficient.powi(exponent);

        let mut delay_ms = (exponential_delay as u64).min(self.max_interval.as_millis() as u64);

        if self.use_jitter {
            let jitter = rand::random::<f64>() * 0.1 + 0.95; // ±5%
            delay_ms = (jitter * delay_ms as f64) as u64;
        }

        Duration::from_millis(delay_ms)
    }
}

/// Timeouts and retry policy applied to one activity invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityOptions {
    /// How long an attempt may wait for a free activity worker
    pub schedule_to_start: Duration,
    /// How long a single attempt may run
    pub start_to_close: Duration,
    /// Deadline across all attempts, retries included
    pub schedule_to_close: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_start: Duration::from_secs(10 * 60),
            start_to_close: Duration::from_secs(20 * 60),
            schedule_to_close: Duration::from_secs(30 * 60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(350),
            backoff_coefficient: 2.0,
            use_jitter: false,
        }
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_five_percent() {
        let policy = RetryPolicy {
            use_jitter: true,
            ..policy()
        };
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((95..=105).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_should_retry_respects_attempts_and_error_class() {
        let policy = policy();
        let transient = AppError::VirtualizationError("task busy".into());
        let fatal = AppError::ActivityPanic {
            activity: "create-node".into(),
            message: "index out of bounds".into(),
        };

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(3, &transient));
        assert!(!policy.should_retry(4, &transient));
        assert!(!policy.should_retry(1, &fatal));
        assert!(!RetryPolicy::no_retry().should_retry(1, &transient));
    }
}
