//! Exponential backoff with full jitter.
//!
//! Used by the anchor drain worker: the delay doubles per attempt up to a
//! cap, and the actual wait is drawn uniformly from `[0, delay]` so
//! concurrent retries spread out instead of thundering together.

use std::time::Duration;

use rand::Rng;

/// Backoff curve configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            multiplier: 2.0,
        }
    }

    /// Upper bound of the delay window for a 0-indexed attempt.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base.as_secs_f64() * self.multiplier.powi(attempt.min(63) as i32);
        Duration::from_secs_f64(raw.min(self.cap.as_secs_f64()))
    }

    /// Full-jitter delay: uniform in `[0, ceiling]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt).as_secs_f64();
        if ceiling <= 0.0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_secs_f64(rng.gen_range(0.0..=ceiling))
    }
}
