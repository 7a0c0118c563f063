//! Per-reader token bucket.
//!
//! Refill rate and burst come from the policy on every check, so a reload
//! takes effect without resetting bucket state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by reader id.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token for the reader. The decrement persists even
    /// when the surrounding event is later rejected: burned tokens are the
    /// one observable side effect a failed verification is allowed.
    pub fn try_acquire(&self, reader_id: &str, rate_per_minute: f64, burst: u32) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(reader_id.to_string()).or_insert(Bucket {
            tokens: burst as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate_per_minute / 60.0).min(burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets for readers not seen recently (sweeper housekeeping).
    pub fn retain_recent(&self, max_age: std::time::Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .unwrap()
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
    }
}
