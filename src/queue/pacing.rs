use std::time::Duration;
use tokio::time::Instant;

/// How the task queue spaces executions against the automated site.
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    /// Upper bound on task starts per minute; `0` disables spacing.
    pub max_requests_per_minute: u32,
    /// Delay before a task when nothing has failed recently.
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter ratio (0.0..=1.0) applied to the computed delay.
    pub jitter_ratio: f64,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 20,
            base_delay: Duration::from_secs(2),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.20,
        }
    }
}

impl PacingPolicy {
    /// No delays at all. Useful for dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            max_requests_per_minute: 0,
            base_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        }
    }

    /// Minimum gap between the end of one successful task and the next start.
    pub fn spacing(&self) -> Duration {
        if self.max_requests_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(60) / self.max_requests_per_minute
    }

    /// `base_delay * 2^consecutive_failures`, clamped to `[min_delay, max_delay]`.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.min(31);
        let multiplier = 1u32 << shift;
        let base = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        base.min(self.max_delay).max(self.min_delay)
    }

    /// Time still owed to the per-minute budget since `last_execution`.
    pub fn spacing_deficit(&self, last_execution: Option<Instant>, now: Instant) -> Duration {
        match last_execution {
            Some(last) => self
                .spacing()
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Delay before the next task, jitter included.
    ///
    /// Jitter never pulls the delay below the spacing deficit, so the
    /// per-minute budget holds even on the low side of the jitter range.
    pub fn next_delay(
        &self,
        consecutive_failures: u32,
        last_execution: Option<Instant>,
        now: Instant,
    ) -> Duration {
        let deficit = self.spacing_deficit(last_execution, now);
        let planned = self.backoff_delay(consecutive_failures).max(deficit);
        self.with_jitter(planned).max(deficit)
    }

    /// Apply jitter to a delay using a symmetric random range.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        let sampled = if high <= low {
            low
        } else {
            rand::random::<f64>() * (high - low) + low
        };
        Duration::from_millis(sampled.round() as u64)
    }
}
