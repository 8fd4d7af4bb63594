use std::time::Duration;

/// Exponential backoff schedule for transient request failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy allowing `retries` retries after the first attempt.
    pub fn with_retries(retries: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: retries + 1,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// A server-provided hint replaces the computed delay; both are capped at
    /// `max_delay`.
    pub fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = hint.unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1u32 << exp)
        });
        computed.min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
