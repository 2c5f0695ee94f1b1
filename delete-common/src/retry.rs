//! # Retry
//!
//! Bounded exponential backoff for operations against a single backing queue.
use std::time;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval before the second attempt.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between attempts.
    pub maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient,
            initial_interval,
            maximum_interval: None,
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> Self {
        self.maximum_interval = Some(interval);
        self
    }

    /// Interval to wait after the given (1-based) failed attempt.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt.saturating_sub(1)));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Three attempts, backing off 2s then 4s.
    fn default() -> Self {
        Self::new(3, 2, time::Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let retry_policy = RetryPolicy::default();

        assert_eq!(retry_policy.retry_interval(1), time::Duration::from_secs(2));
        assert_eq!(retry_policy.retry_interval(2), time::Duration::from_secs(4));
        assert!(retry_policy.should_retry(1));
        assert!(retry_policy.should_retry(2));
        assert!(!retry_policy.should_retry(3));
    }

    #[test]
    fn test_constant_retry_interval() {
        let retry_policy = RetryPolicy::new(5, 1, time::Duration::from_secs(2));

        assert_eq!(retry_policy.retry_interval(1), time::Duration::from_secs(2));
        assert_eq!(retry_policy.retry_interval(2), time::Duration::from_secs(2));
        assert_eq!(retry_policy.retry_interval(3), time::Duration::from_secs(2));
    }

    #[test]
    fn test_retry_interval_never_exceeds_maximum() {
        let retry_policy = RetryPolicy::new(5, 2, time::Duration::from_secs(2))
            .maximum_interval(time::Duration::from_secs(4));

        assert_eq!(retry_policy.retry_interval(1), time::Duration::from_secs(2));
        assert_eq!(retry_policy.retry_interval(2), time::Duration::from_secs(4));
        assert_eq!(retry_policy.retry_interval(3), time::Duration::from_secs(4));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let retry_policy = RetryPolicy::new(0, 2, time::Duration::from_secs(1));

        assert_eq!(retry_policy.max_attempts, 1);
        assert!(!retry_policy.should_retry(1));
    }
}
