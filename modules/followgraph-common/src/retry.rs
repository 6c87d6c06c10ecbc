use std::time::Duration;

/// Bounded exponential backoff shared by the API fetcher and the graph query layer.
///
/// Attempt `n` (0-based) waits `base * 2^n`, capped at `max_delay`, before the
/// next try. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// External API rate limiting: 3 attempts, 2s, 4s.
    pub const RATE_LIMIT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(30),
    };

    /// Graph lock contention: 3 attempts, 100ms, 200ms, capped at 1s.
    pub const LOCK_CONTENTION: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    };

    /// No waiting between attempts. Used by tests.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another try is allowed after `attempt` (0-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::LOCK_CONTENTION
    }
}
