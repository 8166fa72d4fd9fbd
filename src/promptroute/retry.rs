//! Retry budget and backoff schedule.
//!
//! Retryable provider failures (rate limits, transient upstream errors) are
//! retried inside the adapter with exponential backoff plus 20% additive
//! jitter, capped at 30 seconds per delay. Non-retryable failures propagate
//! immediately.

use std::time::Duration;

use rand::Rng;

/// Hard cap on any single backoff delay.
const MAX_DELAY_MS: u64 = 30_000;

/// Retry budget and backoff base for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for attempt 0, doubled each retry.
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Default budget for unary calls.
    pub fn unary() -> Self {
        RetryPolicy::default()
    }

    /// Default budget for streaming calls: one retry fewer, since a partial
    /// stream may already have reached the client.
    pub fn streaming() -> Self {
        RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        }
    }

    /// Override the retry count, keeping the backoff base.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..self
        }
    }

    /// Delay before retrying after a failed `attempt` (0-based):
    /// `min(30_000, initial · 2^attempt + U[0, 0.2 · initial · 2^attempt])`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.min(20));
        let jitter_bound = base / 5;
        let jitter = if jitter_bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_bound)
        };
        Duration::from_millis(base.saturating_add(jitter).min(MAX_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 1_000,
        };
        for attempt in 0..8 {
            let base = 1_000u64 << attempt;
            let delay = policy.backoff_delay(attempt).as_millis() as u64;
            assert!(delay >= base.min(MAX_DELAY_MS), "attempt {}", attempt);
            assert!(delay <= (base + base / 5).min(MAX_DELAY_MS), "attempt {}", attempt);
        }
        // Saturation: far past the cap the delay stays pinned.
        assert_eq!(
            policy.backoff_delay(12).as_millis() as u64,
            MAX_DELAY_MS
        );
    }

    #[test]
    fn expected_backoff_is_monotone_before_saturation() {
        let policy = RetryPolicy::default();
        // E[b(n)] = base + base/10; comparing bases suffices.
        let mut previous = 0u64;
        for attempt in 0..5 {
            let base = policy.initial_delay_ms << attempt;
            assert!(base >= previous);
            previous = base;
        }
    }

    #[test]
    fn streaming_budget_is_smaller() {
        assert_eq!(RetryPolicy::unary().max_retries, 3);
        assert_eq!(RetryPolicy::streaming().max_retries, 2);
    }
}
