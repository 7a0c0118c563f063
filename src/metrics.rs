//! Service counters.
//!
//! Plain atomics surfaced through `/stats/summary` and `/system/status`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters for the core pipeline and workers.
#[derive(Debug, Default)]
pub struct Metrics {
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub decisions_allowed: AtomicU64,
    pub decisions_blocked: AtomicU64,
    pub links_appended: AtomicU64,
    pub links_reconciled: AtomicU64,
    pub anchors_sent: AtomicU64,
    pub anchors_failed: AtomicU64,
    /// Incremented whenever the pending-anchor depth exceeds the configured
    /// maximum. Ingest is never blocked or dropped on anchor backpressure.
    pub anchor_backlog_warnings: AtomicU64,
    pub nonces_swept: AtomicU64,
    pub challenges_expired: AtomicU64,
}

/// Serializable snapshot of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub decisions_allowed: u64,
    pub decisions_blocked: u64,
    pub links_appended: u64,
    pub links_reconciled: u64,
    pub anchors_sent: u64,
    pub anchors_failed: u64,
    pub anchor_backlog_warnings: u64,
    pub nonces_swept: u64,
    pub challenges_expired: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            decisions_allowed: self.decisions_allowed.load(Ordering::Relaxed),
            decisions_blocked: self.decisions_blocked.load(Ordering::Relaxed),
            links_appended: self.links_appended.load(Ordering::Relaxed),
            links_reconciled: self.links_reconciled.load(Ordering::Relaxed),
            anchors_sent: self.anchors_sent.load(Ordering::Relaxed),
            anchors_failed: self.anchors_failed.load(Ordering::Relaxed),
            anchor_backlog_warnings: self.anchor_backlog_warnings.load(Ordering::Relaxed),
            nonces_swept: self.nonces_swept.load(Ordering::Relaxed),
            challenges_expired: self.challenges_expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.events_accepted);
        Metrics::incr(&metrics.events_accepted);
        Metrics::add(&metrics.nonces_swept, 5);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_accepted, 2);
        assert_eq!(snap.nonces_swept, 5);
        assert_eq!(snap.events_rejected, 0);
    }
}
