//! Backoff policy for transient poll failures.
//!
//! The consumption loop never gives up on a failing transport; it keeps
//! retrying with exponentially growing, capped delays so a broken broker is
//! not hammered while the repository keeps serving its last known state.

use std::time::Duration;

/// Exponential backoff with a ceiling and optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for doubling).
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0) to spread retries of many instances.
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Creates a new backoff policy.
    #[must_use]
    pub fn new(initial_backoff: Duration, max_backoff: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Creates a doubling policy with 10% jitter.
    #[must_use]
    pub fn exponential(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self::new(initial_backoff, max_backoff, 2.0, 0.1)
    }

    /// Calculates the delay after `attempt` consecutive failures.
    ///
    /// Attempt 0 means no failure yet and yields no delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // exponent is clamped below i32::MAX
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_precision_loss)] // acceptable for delay calculation
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base_delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let clamped = base_delay.min(self.max_backoff.as_secs_f64());

        // Deterministic spread keyed on the attempt number.
        let jitter_offset = if self.jitter > 0.0 {
            let pseudo_random = ((attempt as f64 * 0.618_033_988_749_895) % 1.0) * 2.0 - 1.0;
            clamped * self.jitter * pseudo_random
        } else {
            0.0
        };

        Duration::from_secs_f64((clamped + jitter_offset).clamp(0.0, self.max_backoff.as_secs_f64()))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(5))
    }
}
