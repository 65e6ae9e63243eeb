//! Retry timing shared by every retrying component.
//!
//! A [`RetryPolicy`] only answers one question: after the N-th failed
//! attempt, how long to wait before the next one (or `None` to give up).
//! The callers own the loop, which keeps them testable by injecting
//! short delays.
//!
//! # Backoff Strategy
//!
//! ```text
//! failed attempt n <= backoff_attempts : base_delay * 2^(n-1) + jitter
//! failed attempt n >  backoff_attempts : long_delay + jitter
//! n >= max_attempts (if bounded)       : give up
//! ```

use rand::{Rng, rng};
use std::time::Duration;

/// Timing rules for a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure; doubles for each following failure.
    pub base_delay: Duration,
    /// Number of failures that use exponential backoff.
    pub backoff_attempts: u32,
    /// Fixed delay used once the exponential phase is over.
    pub long_delay: Duration,
    /// Total attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Upper bound of the random delay added to every wait.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Policy for long-lived background polling: 2s, 4s, 8s, then every
    /// 10 minutes, forever.
    pub fn background() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            backoff_attempts: 3,
            long_delay: Duration::from_secs(10 * 60),
            max_attempts: None,
            max_jitter: Duration::from_millis(250),
        }
    }

    /// Constant delay between attempts.
    pub fn fixed(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay: delay,
            backoff_attempts: 0,
            long_delay: delay,
            max_attempts,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the next attempt after `failed_attempt` (1-based) failed,
    /// or `None` when the attempt budget is used up.
    pub fn delay_after(&self, failed_attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && failed_attempt >= max
        {
            return None;
        }

        let delay = if failed_attempt >= 1 && failed_attempt <= self.backoff_attempts {
            // cap the shift so absurd configs cannot overflow
            let exp = (failed_attempt - 1).min(16);
            self.base_delay.saturating_mul(1 << exp)
        } else {
            self.long_delay
        };

        Some(delay + self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms: u64 = rng().random_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::background()
    }
}
