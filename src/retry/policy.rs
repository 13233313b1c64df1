use std::time::Duration;

/// Strategy for retrying a failed phase with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap for later delays.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt numbered `attempt` (1-based):
    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32 << attempt.min(31);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
