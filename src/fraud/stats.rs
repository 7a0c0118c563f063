//! Cross-reader transaction statistics.
//!
//! Recomputed periodically by the sweeper into an immutable snapshot; the
//! fraud detector reads the current snapshot without coordination.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::ReaderStatus;
use crate::infra::{DecisionStore, ReaderStore, Result};

/// Immutable per-window transaction counts.
#[derive(Debug, Clone, Default)]
pub struct CrossReaderStats {
    /// Decision counts per reader inside the window.
    pub counts: HashMap<String, u64>,
    /// Mean count across active readers.
    pub active_mean: f64,
    pub computed_at: i64,
}

impl CrossReaderStats {
    pub fn count_for(&self, reader_id: &str) -> u64 {
        self.counts.get(reader_id).copied().unwrap_or(0)
    }

    /// Outlier rule: count strictly above `multiplier × mean` of active
    /// peers.
    pub fn is_outlier(&self, reader_id: &str, multiplier: f64) -> bool {
        self.active_mean > 0.0
            && (self.count_for(reader_id) as f64) > multiplier * self.active_mean
    }
}

/// Shared holder for the latest snapshot.
#[derive(Default)]
pub struct StatsHandle {
    inner: RwLock<Arc<CrossReaderStats>>,
}

impl StatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<CrossReaderStats> {
        self.inner.read().expect("stats lock poisoned").clone()
    }

    pub fn store(&self, stats: CrossReaderStats) {
        *self.inner.write().expect("stats lock poisoned") = Arc::new(stats);
    }
}

/// Recompute the snapshot over the configured window.
pub async fn compute_stats(
    readers: &dyn ReaderStore,
    decisions: &dyn DecisionStore,
    window_secs: i64,
    now: i64,
) -> Result<CrossReaderStats> {
    let since = now - window_secs;
    let mut counts = HashMap::new();
    let mut active_total = 0u64;
    let mut active_readers = 0u64;

    for reader in readers.list().await? {
        let count = decisions
            .count_for_reader_since(&reader.reader_id, since)
            .await?;
        if reader.status == ReaderStatus::Active {
            active_total += count;
            active_readers += 1;
        }
        counts.insert(reader.reader_id, count);
    }

    let active_mean = if active_readers > 0 {
        active_total as f64 / active_readers as f64
    } else {
        0.0
    };

    Ok(CrossReaderStats {
        counts,
        active_mean,
        computed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(counts: &[(&str, u64)], mean: f64) -> CrossReaderStats {
        CrossReaderStats {
            counts: counts
                .iter()
                .map(|(id, n)| (id.to_string(), *n))
                .collect(),
            active_mean: mean,
            computed_at: 0,
        }
    }

    #[test]
    fn outlier_requires_positive_mean() {
        let s = stats(&[("R1", 50)], 0.0);
        assert!(!s.is_outlier("R1", 3.0));
    }

    #[test]
    fn outlier_over_three_times_mean() {
        let s = stats(&[("R1", 31), ("R2", 10)], 10.0);
        assert!(s.is_outlier("R1", 3.0));
        assert!(!s.is_outlier("R2", 3.0));
        // Exactly 3× the mean is not an outlier.
        let s = stats(&[("R3", 30)], 10.0);
        assert!(!s.is_outlier("R3", 3.0));
    }

    #[test]
    fn handle_swaps_snapshots() {
        let handle = StatsHandle::new();
        assert_eq!(handle.load().count_for("R1"), 0);
        handle.store(stats(&[("R1", 7)], 7.0));
        assert_eq!(handle.load().count_for("R1"), 7);
    }
}
