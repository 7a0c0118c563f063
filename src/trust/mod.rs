//! Reader trust engine.
//!
//! Applies weighted penalties and rewards, decays penalties with time,
//! classifies enforcement status and drives quarantine entry with tag
//! suspicion propagation. All updates for one reader run under the
//! per-reader lock held by the caller, so score transitions are monotonic
//! per reader and no penalty is lost.

pub mod healing;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{
    QuarantineRecord, Reader, ReaderStatus, TagSuspicion, TrustSnapshot, ViolationClass,
    ViolationRecord,
};
use crate::infra::{
    DecisionStore, HealingStore, ReaderStore, Result, TollError, ViolationLog,
};
use crate::policy::{PolicyHandle, TrustPolicy};

pub use healing::{ChallengeResponse, ChallengeResult, ConsensusStatus, HealingEngine};

/// Status classification for a non-quarantined score.
pub fn classify(score: i32, policy: &TrustPolicy) -> ReaderStatus {
    if score >= policy.thresholds.trusted_floor {
        ReaderStatus::Active
    } else if score >= policy.thresholds.degraded_floor {
        ReaderStatus::Degraded
    } else {
        ReaderStatus::Suspended
    }
}

/// Logarithmic recovery applicable at an update, in points.
///
/// `recovery = min(cap, rate × ln(1 + hours_since_last_update))`, gated on
/// the last violation being at least `min_gap` old. Quarantined and
/// probation readers never decay through this path.
fn recovery_points(reader: &Reader, policy: &TrustPolicy, now: i64) -> f64 {
    if matches!(
        reader.status,
        ReaderStatus::Quarantined | ReaderStatus::Probation
    ) {
        return 0.0;
    }
    let Some(last_violation) = reader.last_violation_at else {
        return 0.0;
    };
    if now - last_violation < policy.recovery.min_gap_secs {
        return 0.0;
    }
    let hours = (now - reader.last_update_at).max(0) as f64 / 3600.0;
    if hours <= 0.0 {
        return 0.0;
    }
    policy
        .recovery
        .cap
        .min(policy.recovery.rate * (1.0 + hours).ln())
}

/// Trust engine over the reader registry.
pub struct TrustEngine {
    readers: Arc<dyn ReaderStore>,
    healing: Arc<dyn HealingStore>,
    decisions: Arc<dyn DecisionStore>,
    violations: Arc<dyn ViolationLog>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
}

impl TrustEngine {
    pub fn new(
        readers: Arc<dyn ReaderStore>,
        healing: Arc<dyn HealingStore>,
        decisions: Arc<dyn DecisionStore>,
        violations: Arc<dyn ViolationLog>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            readers,
            healing,
            decisions,
            violations,
            policy,
            clock,
        }
    }

    /// Apply a violation of class `class` with confidence `c ∈ [0, 1]`.
    ///
    /// Critical violations quarantine on a single occurrence regardless of
    /// the resulting score; the policy can extend that set and sets the
    /// score floor below which any violation quarantines.
    pub async fn penalize(
        &self,
        reader_id: &str,
        class: ViolationClass,
        confidence: f64,
        detail: &str,
    ) -> Result<TrustSnapshot> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;

        let decayed =
            (reader.trust_score as f64 + recovery_points(&reader, &policy, now)).min(100.0);
        let weighted = policy.base_penalty(class)
            * policy.penalty_weight(class)
            * confidence.clamp(0.5, 1.0);
        let new_score = (decayed - weighted).round().clamp(0.0, 100.0) as i32;
        let delta = new_score - reader.trust_score;

        reader.trust_score = new_score;
        reader.last_violation_at = Some(now);
        reader.last_update_at = now;
        reader.consecutive_successes = 0;
        match class {
            ViolationClass::BadSignature | ViolationClass::BadKeyVersion => {
                reader.auth_failures += 1;
            }
            ViolationClass::Replay => reader.replay_attempts += 1,
            _ => {}
        }

        let quarantine_now = class.is_critical()
            || policy.penalties.quarantine_on.contains(&class)
            || new_score < policy.thresholds.quarantine_floor;

        if quarantine_now {
            self.enter_quarantine(&mut reader, class.to_string(), policy.quarantine_severity(class), now)
                .await?;
        } else if !matches!(
            reader.status,
            ReaderStatus::Quarantined | ReaderStatus::Probation
        ) {
            reader.status = classify(new_score, &policy);
        }

        warn!(
            reader_id,
            %class,
            delta,
            score = reader.trust_score,
            status = ?reader.status,
            "trust penalty applied"
        );

        self.violations
            .append(ViolationRecord {
                reader_id: reader_id.to_string(),
                class,
                delta,
                detail: detail.to_string(),
                at: now,
            })
            .await?;

        let snapshot = TrustSnapshot {
            trust_score: reader.trust_score,
            status: reader.status,
        };
        self.readers.put(reader).await?;
        Ok(snapshot)
    }

    /// Record an allowed event: decay, streak bookkeeping and the periodic
    /// clean-transaction reward.
    pub async fn reward_success(&self, reader_id: &str) -> Result<TrustSnapshot> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;

        let mut score =
            (reader.trust_score as f64 + recovery_points(&reader, &policy, now)).min(100.0);

        reader.consecutive_successes += 1;
        if policy.rewards.streak > 0 && reader.consecutive_successes % policy.rewards.streak == 0 {
            score = (score + policy.rewards.clean_points).min(100.0);
        }

        reader.trust_score = score.round() as i32;
        reader.last_update_at = now;
        if !matches!(
            reader.status,
            ReaderStatus::Quarantined | ReaderStatus::Probation
        ) {
            reader.status = classify(reader.trust_score, &policy);
        }

        let snapshot = TrustSnapshot {
            trust_score: reader.trust_score,
            status: reader.status,
        };
        self.readers.put(reader).await?;
        Ok(snapshot)
    }

    /// Decay-only update, used by the sweeper so idle readers recover
    /// without traffic.
    pub async fn apply_recovery(&self, reader_id: &str) -> Result<Option<TrustSnapshot>> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let Some(mut reader) = self.readers.get(reader_id).await? else {
            return Ok(None);
        };

        let recovery = recovery_points(&reader, &policy, now);
        if recovery < 0.5 {
            return Ok(None);
        }

        let old = reader.trust_score;
        reader.trust_score = ((reader.trust_score as f64 + recovery).min(100.0)).round() as i32;
        reader.last_update_at = now;
        reader.status = classify(reader.trust_score, &policy);

        info!(
            reader_id,
            old,
            new = reader.trust_score,
            status = ?reader.status,
            "trust decay recovery"
        );

        let snapshot = TrustSnapshot {
            trust_score: reader.trust_score,
            status: reader.status,
        };
        self.readers.put(reader).await?;
        Ok(Some(snapshot))
    }

    /// Admin override of a reader's score; clears any active quarantine.
    pub async fn reset_trust(&self, reader_id: &str, score: i32) -> Result<TrustSnapshot> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;

        if let Some(mut quarantine) = self.healing.active_quarantine(reader_id).await? {
            quarantine.cleared_at = Some(now);
            self.healing.put_quarantine(quarantine).await?;
            self.healing.clear_votes_for(reader_id).await?;
            self.healing.clear_suspicions_from(reader_id).await?;
        }

        reader.trust_score = score.clamp(0, 100);
        reader.status = classify(reader.trust_score, &policy);
        reader.last_update_at = now;
        reader.consecutive_successes = 0;

        let snapshot = TrustSnapshot {
            trust_score: reader.trust_score,
            status: reader.status,
        };
        self.readers.put(reader).await?;
        Ok(snapshot)
    }

    /// Admin-forced quarantine.
    pub async fn force_quarantine(&self, reader_id: &str, reason: &str) -> Result<TrustSnapshot> {
        let now = self.clock.now_unix();
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;

        self.enter_quarantine(&mut reader, reason.to_string(), 1, now)
            .await?;

        let snapshot = TrustSnapshot {
            trust_score: reader.trust_score,
            status: reader.status,
        };
        self.readers.put(reader).await?;
        Ok(snapshot)
    }

    /// Transition a reader into quarantine, escalating an existing one.
    ///
    /// Entering quarantine propagates suspicion onto every tag this reader
    /// produced decisions for inside the suspicion window.
    async fn enter_quarantine(
        &self,
        reader: &mut Reader,
        trigger: String,
        severity: u8,
        now: i64,
    ) -> Result<()> {
        let policy = self.policy.load();

        match self.healing.active_quarantine(&reader.reader_id).await? {
            Some(mut existing) => {
                existing.severity = (existing.severity + 1).min(3);
                existing.probation_started_at = None;
                existing.consensus_opened_at = None;
                self.healing.put_quarantine(existing).await?;
                self.healing.clear_votes_for(&reader.reader_id).await?;
            }
            None => {
                self.healing
                    .put_quarantine(QuarantineRecord {
                        quarantine_id: Uuid::new_v4(),
                        reader_id: reader.reader_id.clone(),
                        entered_at: now,
                        severity: severity.clamp(1, 3),
                        trigger_violation: trigger,
                        trust_score_at_entry: reader.trust_score,
                        cleared_at: None,
                        probation_started_at: None,
                        consensus_opened_at: None,
                    })
                    .await?;
            }
        }

        reader.status = ReaderStatus::Quarantined;

        let since = now - policy.suspicion.window_secs;
        let tags = self
            .decisions
            .tags_for_reader_since(&reader.reader_id, since)
            .await?;
        for tag_hash in tags {
            self.healing
                .put_suspicion(TagSuspicion {
                    tag_hash,
                    source_reader_id: reader.reader_id.clone(),
                    multiplier: policy.suspicion.multiplier,
                    expires_at: now + policy.suspicion.ttl_secs,
                })
                .await?;
        }

        warn!(
            reader_id = %reader.reader_id,
            score = reader.trust_score,
            "reader quarantined"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{Decision, DecisionRecord, RuleFlag};
    use crate::infra::{
        MemoryDecisionStore, MemoryHealingStore, MemoryReaderStore, MemoryViolationLog,
    };

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        engine: TrustEngine,
        readers: Arc<MemoryReaderStore>,
        healing: Arc<MemoryHealingStore>,
        decisions: Arc<MemoryDecisionStore>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let readers = Arc::new(MemoryReaderStore::new());
        let healing = Arc::new(MemoryHealingStore::new());
        let decisions = Arc::new(MemoryDecisionStore::new());
        let violations = Arc::new(MemoryViolationLog::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let policy = Arc::new(PolicyHandle::fixed(TrustPolicy::default()));

        readers
            .put(Reader::new("R1", b"s".to_vec(), NOW))
            .await
            .unwrap();

        let engine = TrustEngine::new(
            readers.clone(),
            healing.clone(),
            decisions.clone(),
            violations,
            policy,
            clock.clone() as Arc<dyn Clock>,
        );
        Fixture {
            engine,
            readers,
            healing,
            decisions,
            clock,
        }
    }

    #[test]
    fn classification_boundaries() {
        let policy = TrustPolicy::default();
        assert_eq!(classify(70, &policy), ReaderStatus::Active);
        assert_eq!(classify(69, &policy), ReaderStatus::Degraded);
        assert_eq!(classify(35, &policy), ReaderStatus::Degraded);
        assert_eq!(classify(34, &policy), ReaderStatus::Suspended);
        assert_eq!(classify(0, &policy), ReaderStatus::Suspended);
        assert_eq!(classify(100, &policy), ReaderStatus::Active);
    }

    #[tokio::test]
    async fn single_replay_quarantines() {
        let f = fixture().await;
        let snap = f
            .engine
            .penalize("R1", ViolationClass::Replay, 1.0, "replayed nonce")
            .await
            .unwrap();
        // Penalized by base_penalty[REPLAY] and quarantined outright: a
        // replay is critical regardless of the remaining score.
        assert_eq!(snap.trust_score, 60);
        assert_eq!(snap.status, ReaderStatus::Quarantined);

        let reader = f.readers.get("R1").await.unwrap().unwrap();
        assert_eq!(reader.replay_attempts, 1);
        assert_eq!(reader.last_violation_at, Some(NOW));
        let q = f.healing.active_quarantine("R1").await.unwrap().unwrap();
        assert_eq!(q.severity, 2);
    }

    #[tokio::test]
    async fn bad_signature_streak_quarantines() {
        let f = fixture().await;
        // The first bad signature quarantines; later ones keep draining the
        // score and escalate severity: 100 -> 60 -> 20.
        for expected in [60, 20] {
            let snap = f
                .engine
                .penalize("R1", ViolationClass::BadSignature, 1.0, "zero signature")
                .await
                .unwrap();
            assert_eq!(snap.trust_score, expected);
            assert_eq!(snap.status, ReaderStatus::Quarantined);
        }
        let q = f.healing.active_quarantine("R1").await.unwrap().unwrap();
        assert_eq!(q.severity, 3);
    }

    #[tokio::test]
    async fn non_critical_violation_degrades_without_quarantine() {
        let f = fixture().await;
        // FRAUD_RULE is not critical: 100 -> 85 stays ACTIVE, no record.
        let snap = f
            .engine
            .penalize("R1", ViolationClass::FraudRule, 1.0, "amount ceiling")
            .await
            .unwrap();
        assert_eq!(snap.trust_score, 85);
        assert_eq!(snap.status, ReaderStatus::Active);
        assert!(f.healing.active_quarantine("R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confidence_scales_penalty() {
        let f = fixture().await;
        // Confidence clamped to [0.5, 1.0]: 0.1 behaves as 0.5.
        let snap = f
            .engine
            .penalize("R1", ViolationClass::Replay, 0.1, "low confidence")
            .await
            .unwrap();
        assert_eq!(snap.trust_score, 80);
    }

    #[tokio::test]
    async fn balance_manipulation_quarantines_immediately() {
        let f = fixture().await;
        let snap = f
            .engine
            .penalize(
                "R1",
                ViolationClass::BalanceManipulation,
                1.0,
                "negative balance",
            )
            .await
            .unwrap();
        assert_eq!(snap.status, ReaderStatus::Quarantined);
        let q = f.healing.active_quarantine("R1").await.unwrap().unwrap();
        assert_eq!(q.severity, 3);
    }

    /// Put R1 at 60 (DEGRADED) with a violation stamped at NOW.
    async fn degrade_reader(f: &Fixture) {
        let mut reader = f.readers.get("R1").await.unwrap().unwrap();
        reader.trust_score = 60;
        reader.status = ReaderStatus::Degraded;
        reader.last_violation_at = Some(NOW);
        reader.last_update_at = NOW;
        f.readers.put(reader).await.unwrap();
    }

    #[tokio::test]
    async fn decay_recovery_after_idle_period() {
        let f = fixture().await;
        degrade_reader(&f).await;

        // 10 hours idle, past the recovery gap.
        f.clock.advance(10 * 3600);
        let snap = f.engine.apply_recovery("R1").await.unwrap().unwrap();
        // 60 + 5·ln(11) ≈ 72
        assert_eq!(snap.trust_score, 72);
        assert_eq!(snap.status, ReaderStatus::Active);
    }

    #[tokio::test]
    async fn no_recovery_within_min_gap() {
        let f = fixture().await;
        degrade_reader(&f).await;
        f.clock.advance(600);
        assert!(f.engine.apply_recovery("R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reward_streak_adds_points() {
        let f = fixture().await;
        // Drop below 100 first so the reward is visible.
        f.engine
            .penalize("R1", ViolationClass::StaleTimestamp, 1.0, "drift")
            .await
            .unwrap();
        let base = f.readers.get("R1").await.unwrap().unwrap().trust_score;

        let streak = TrustPolicy::default().rewards.streak;
        let mut last = base;
        for _ in 0..streak {
            last = f.engine.reward_success("R1").await.unwrap().trust_score;
        }
        assert_eq!(last, base + TrustPolicy::default().rewards.clean_points as i32);
    }

    #[tokio::test]
    async fn quarantine_propagates_tag_suspicion() {
        let f = fixture().await;
        f.decisions
            .append(DecisionRecord {
                event_id: Uuid::new_v4(),
                reader_id: "R1".to_string(),
                tag_hash: "tag-1".to_string(),
                timestamp: NOW,
                ml_a: None,
                ml_b: None,
                iso_flag: 0,
                rule_flags: vec![RuleFlag::DuplicateScanWindow],
                trust_snapshot: TrustSnapshot {
                    trust_score: 100,
                    status: ReaderStatus::Active,
                },
                decision: Decision::Allow,
                reason_codes: vec![],
                amount: 50.0,
                decided_at: NOW,
            })
            .await
            .unwrap();

        f.engine
            .force_quarantine("R1", "manual review")
            .await
            .unwrap();

        let multiplier = f
            .healing
            .suspicion_multiplier("tag-1", NOW + 10)
            .await
            .unwrap();
        assert!(multiplier > 1.0);
    }

    #[tokio::test]
    async fn repeated_quarantine_escalates_severity() {
        let f = fixture().await;
        f.engine.force_quarantine("R1", "first").await.unwrap();
        f.engine.force_quarantine("R1", "second").await.unwrap();
        let q = f.healing.active_quarantine("R1").await.unwrap().unwrap();
        assert_eq!(q.severity, 2);
    }

    #[tokio::test]
    async fn reset_trust_clears_quarantine() {
        let f = fixture().await;
        f.engine.force_quarantine("R1", "bad").await.unwrap();
        let snap = f.engine.reset_trust("R1", 90).await.unwrap();
        assert_eq!(snap.trust_score, 90);
        assert_eq!(snap.status, ReaderStatus::Active);
        assert!(f.healing.active_quarantine("R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn score_clamped_at_zero() {
        let f = fixture().await;
        for _ in 0..5 {
            f.engine
                .penalize("R1", ViolationClass::BadSignature, 1.0, "x")
                .await
                .unwrap();
        }
        let reader = f.readers.get("R1").await.unwrap().unwrap();
        assert!(reader.trust_score >= 0);
    }
}
