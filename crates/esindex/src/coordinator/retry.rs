//! Exponential backoff for retryable API failures.

use std::time::Duration;

/// Retry policy: `base * 2^(attempt-1)`, capped at `max_delay`.
///
/// A server `retry-after` hint replaces the computed delay when it is
/// longer, and is also capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for page fetches.
    pub const fn pages() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Policy for per-message detail fetches.
    pub const fn messages() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt, after `attempt` failures (1-based).
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        match retry_after {
            Some(hint) if hint > computed => hint.min(self.max_delay),
            _ => computed,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::pages()
    }
}
