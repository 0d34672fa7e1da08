//! Shared retry/backoff calculator used by the `http` executor (spec
//! atomic executors that want the same
//! policy. Grounded on `orchestrator::executor::retry::{RetryConfig,
//! retry_with_backoff}` — every atomic type shares one backoff implementation
//! across its node kinds rather than rolling a bespoke one per executor.

use std::time::Duration;

/// Whether an error observed by an atomic executor should be retried.
/// Mirrors `orchestrator::executor::retry::ErrorClass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Classify an HTTP-ish status code:
/// `recoverable = (statusCode >= 500) or (statusCode == 429)`.
pub fn classify_status(status: u16) -> ErrorClass {
    if status >= 500 || status == 429 {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Backoff/retry policy. `backoff_delay` computes
/// `retryDelay x 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// HTTP statuses that should be retried, beyond the 5xx/429 default.
    pub retry_on: Vec<u16>,
    /// Add up to 25% random jitter to each computed delay, so a burst of
    /// concurrently retrying callers doesn't resynchronize on the same
    /// backoff schedule.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            retry_on: vec![429, 500, 502, 503, 504],
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    pub fn with_retry_on(mut self, codes: Vec<u16>) -> Self {
        self.retry_on = codes;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on.contains(&status) || classify_status(status) == ErrorClass::Transient
    }

    /// `attempt` is 1-based: the delay before the *next* attempt after a
    /// failed attempt number `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay.saturating_mul(factor as u32).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let jitter_amount = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
        (delay + Duration::from_millis(jitter_amount)).min(self.max_delay + Duration::from_millis(jitter_amount))
    }

    /// Total attempts including the first, i.e. `1 + max_retries`.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_matches_spec_heuristic() {
        assert_eq!(classify_status(500), ErrorClass::Transient);
        assert_eq!(classify_status(429), ErrorClass::Transient);
        assert_eq!(classify_status(404), ErrorClass::Permanent);
        assert_eq!(classify_status(200), ErrorClass::Permanent);
    }

    #[test]
    fn backoff_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_retry_on(vec![503])
            .without_jitter();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        let capped = RetryPolicy {
            max_delay: Duration::from_millis(250),
            ..policy
        };
        assert_eq!(capped.backoff_delay(3), Duration::from_millis(250));
    }

    #[test]
    fn total_attempts_counts_first_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        assert_eq!(policy.total_attempts(), 3);
    }
}
