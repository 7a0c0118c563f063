//! Periodic maintenance sweeper.
//!
//! One background task covering: nonce garbage collection, expired tag
//! suspicions, idle-reader trust recovery, the self-healing lifecycle
//! (probation entry, challenge expiry, consensus timeouts), cross-reader
//! stats refresh and chain reconciliation in asynchronous append mode.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chain::VdfChain;
use crate::clock::Clock;
use crate::domain::ReaderStatus;
use crate::fraud::{compute_stats, StatsHandle};
use crate::infra::{
    spawn_until_shutdown, DecisionStore, HealingStore, NonceLedger, ReaderStore, Result,
    ShutdownSignal,
};
use crate::metrics::Metrics;
use crate::policy::PolicyHandle;
use crate::trust::{HealingEngine, TrustEngine};

/// Owns one maintenance pass; the server spawns it on an interval.
pub struct Sweeper {
    readers: Arc<dyn ReaderStore>,
    nonces: Arc<dyn NonceLedger>,
    decisions: Arc<dyn DecisionStore>,
    healing_store: Arc<dyn HealingStore>,
    trust: Arc<TrustEngine>,
    healing: Arc<HealingEngine>,
    chain: Arc<VdfChain>,
    stats: Arc<StatsHandle>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl Sweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        readers: Arc<dyn ReaderStore>,
        nonces: Arc<dyn NonceLedger>,
        decisions: Arc<dyn DecisionStore>,
        healing_store: Arc<dyn HealingStore>,
        trust: Arc<TrustEngine>,
        healing: Arc<HealingEngine>,
        chain: Arc<VdfChain>,
        stats: Arc<StatsHandle>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            readers,
            nonces,
            decisions,
            healing_store,
            trust,
            healing,
            chain,
            stats,
            policy,
            clock,
            metrics,
        }
    }

    /// One full maintenance pass.
    pub async fn run_once(&self) -> Result<()> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();

        // Nonce GC: anything older than twice the drift window can no
        // longer collide with a fresh event.
        let cutoff = now - policy.nonce_retention_secs();
        let swept = self.nonces.remove_observed_before(cutoff).await?;
        if swept > 0 {
            Metrics::add(&self.metrics.nonces_swept, swept as u64);
            info!(swept, "nonce records garbage collected");
        }

        self.healing_store.remove_expired_suspicions(now).await?;

        // Idle decay recovery for readers below full trust.
        for reader in self.readers.list().await? {
            let recoverable = matches!(
                reader.status,
                ReaderStatus::Active | ReaderStatus::Degraded | ReaderStatus::Suspended
            );
            if recoverable && reader.trust_score < 100 {
                self.trust.apply_recovery(&reader.reader_id).await?;
            }
        }

        // Quarantine/probation lifecycle.
        let expired = self.healing.maintenance().await?;
        if expired > 0 {
            Metrics::add(&self.metrics.challenges_expired, expired);
        }

        // Cross-reader snapshot for the fraud detector.
        let stats = compute_stats(
            self.readers.as_ref(),
            self.decisions.as_ref(),
            policy.fraud.cross_window_secs,
            now,
        )
        .await?;
        self.stats.store(stats);

        // Asynchronous append mode: guarantee exactly one link per
        // decision.
        if !policy.vdf.response_awaits_vdf {
            let repaired = self.chain.reconcile(self.decisions.as_ref()).await?;
            if repaired > 0 {
                Metrics::add(&self.metrics.links_reconciled, repaired);
                warn!(repaired, "chain reconciliation appended missing links");
            }
        }

        Ok(())
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self: Arc<Self>, signal: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        let interval_secs = self.policy.load().sweeper.interval_secs.max(1);
        spawn_until_shutdown(signal, async move {
            info!(interval_secs, "sweeper started");
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = self.run_once().await {
                    warn!(%err, "sweeper pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::Reader;
    use crate::infra::{
        MemoryCardStore, MemoryChainStore, MemoryDecisionStore, MemoryHealingStore,
        MemoryNonceLedger, MemoryReaderStore, MemoryViolationLog,
    };
    use crate::policy::TrustPolicy;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        sweeper: Sweeper,
        readers: Arc<MemoryReaderStore>,
        nonces: Arc<MemoryNonceLedger>,
        clock: Arc<ManualClock>,
        stats: Arc<StatsHandle>,
    }

    fn fixture() -> Fixture {
        let readers = Arc::new(MemoryReaderStore::new());
        let nonces = Arc::new(MemoryNonceLedger::new());
        let decisions = Arc::new(MemoryDecisionStore::new());
        let healing_store = Arc::new(MemoryHealingStore::new());
        let violations = Arc::new(MemoryViolationLog::new());
        let cards = Arc::new(MemoryCardStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let policy = Arc::new(PolicyHandle::fixed(TrustPolicy::default()));
        let stats = Arc::new(StatsHandle::new());
        let metrics = Arc::new(Metrics::new());

        let trust = Arc::new(TrustEngine::new(
            readers.clone(),
            healing_store.clone(),
            decisions.clone(),
            violations.clone(),
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let healing = Arc::new(HealingEngine::new(
            readers.clone(),
            healing_store.clone(),
            cards,
            violations,
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let chain = Arc::new(VdfChain::new(
            Arc::new(MemoryChainStore::new()),
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));

        let sweeper = Sweeper::new(
            readers.clone(),
            nonces.clone(),
            decisions,
            healing_store,
            trust.clone(),
            healing,
            chain,
            stats.clone(),
            policy,
            clock.clone() as Arc<dyn Clock>,
            metrics,
        );
        Fixture {
            sweeper,
            readers,
            nonces,
            clock,
            stats,
        }
    }

    #[tokio::test]
    async fn sweeps_old_nonces() {
        let f = fixture();
        f.nonces.insert_if_absent("R1", "old", NOW - 1000).await.unwrap();
        f.nonces.insert_if_absent("R1", "new", NOW).await.unwrap();

        f.sweeper.run_once().await.unwrap();
        assert_eq!(f.nonces.count().await.unwrap(), 1);
        assert!(f.nonces.contains("R1", "new").await.unwrap());
    }

    #[tokio::test]
    async fn recovers_idle_degraded_reader() {
        let f = fixture();
        let mut reader = Reader::new("R1", b"s".to_vec(), NOW);
        reader.trust_score = 60;
        reader.status = ReaderStatus::Degraded;
        reader.last_violation_at = Some(NOW);
        f.readers.put(reader).await.unwrap();

        f.clock.advance(10 * 3600);
        f.sweeper.run_once().await.unwrap();

        let reader = f.readers.get("R1").await.unwrap().unwrap();
        assert!(reader.trust_score > 60);
        assert_eq!(reader.status, ReaderStatus::Active);
    }

    #[tokio::test]
    async fn refreshes_cross_reader_stats() {
        let f = fixture();
        f.readers
            .put(Reader::new("R1", b"s".to_vec(), NOW))
            .await
            .unwrap();
        f.sweeper.run_once().await.unwrap();
        assert_eq!(f.stats.load().computed_at, NOW);
    }
}
