//! Clock service.
//!
//! Wall-clock reads go through the [`Clock`] trait so the trust engine,
//! verifier and workers can be driven with a manual clock in tests. The
//! `/time` endpoint serves the same clock to readers so they can bound their
//! drift against the server.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Time source abstraction: unix seconds plus a monotonic instant.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_unix(&self) -> i64;

    /// Monotonic instant for interval measurement (rate limiting, backoff).
    fn monotonic(&self) -> Instant;
}

/// Production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            seconds: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.seconds.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.seconds.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_unix(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_unix(), 42);
    }

    #[test]
    fn system_clock_is_sane() {
        let clock = SystemClock;
        // Well after 2020-01-01.
        assert!(clock.now_unix() > 1_577_836_800);
    }
}
