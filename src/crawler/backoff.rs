//! Exponential backoff with jitter
//!
//! Shared by the governor's rate-limit path and the coordinator's retries of
//! network errors and 5xx responses. The two use separate [`BackoffPolicy`] values.

use crate::config::{seconds, BackoffConfig, RetryConfig};
use crate::stealth::RandomSource;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Policy applied to a domain after HTTP 429
    pub fn from_backoff(config: &BackoffConfig) -> Self {
        Self {
            initial: seconds(config.initial_delay),
            max: seconds(config.max_delay),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Policy applied between connection-level retries
    pub fn from_retry(config: &RetryConfig) -> Self {
        Self {
            initial: seconds(config.base_delay),
            max: seconds(config.max_delay),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before attempt number `attempt` (0-based), without jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        self.bounded(self.raw_secs(attempt))
    }

    /// Delay before attempt number `attempt` (0-based)
    ///
    /// # Arguments
    ///
    /// * `attempt` - Failures seen so far
    /// * `random` - Source for the jitter draw
    ///
    /// # Returns
    ///
    /// `initial × multiplier^attempt`, scaled by a random factor in
    /// `[1 - jitter, 1 + jitter)` and clamped to `[initial, max]`.
    pub fn delay_for(&self, attempt: u32, random: &dyn RandomSource) -> Duration {
        let jitter = 1.0 + self.jitter * (2.0 * random.next_f64() - 1.0);
        self.bounded(self.raw_secs(attempt) * jitter)
    }

    fn raw_secs(&self, attempt: u32) -> f64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        self.initial.as_secs_f64() * self.multiplier.powi(exponent)
    }

    fn bounded(&self, secs: f64) -> Duration {
        let max = self.max.max(self.initial);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        seconds(secs).max(self.initial)
    }
}
