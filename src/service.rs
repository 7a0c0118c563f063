//! End-to-end toll processing pipeline.
//!
//! One accepted event flows verify → status gate → fraud decision → trust
//! feedback → card charge → decision log → chain handoff. All state touched
//! for a reader is serialized on that reader's lock, so nonce uniqueness,
//! penalties and status transitions cannot race. The VDF append is handed
//! to the bounded worker queue; whether the response waits for the link is
//! policy-controlled.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use crate::chain::ChainWorkerHandle;
use crate::clock::Clock;
use crate::domain::{
    Decision, DecisionRecord, RejectCode, RuleFlag, TollEvent, TrustSnapshot, ViolationClass,
};
use crate::fraud::{FraudDetector, FraudInput};
use crate::infra::{CardStore, DecisionStore, HealingStore, Result, TollError};
use crate::ingest::{IngestVerifier, VerifyOutcome};
use crate::metrics::Metrics;
use crate::policy::PolicyHandle;
use crate::trust::TrustEngine;

/// Keyed async mutexes, one per reader.
#[derive(Default)]
pub struct ReaderLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ReaderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, reader_id: &str) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .unwrap()
            .entry(reader_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Outcome of processing one inbound event.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Verification failed; the event was never accepted.
    Rejected {
        code: RejectCode,
        trust: Option<TrustSnapshot>,
    },
    /// Accepted and decided (allow or block; both are business outcomes).
    Decided {
        event_id: Uuid,
        decision: Decision,
        reason_codes: Vec<String>,
        trust: TrustSnapshot,
        /// Chain sequence, when the policy awaits the append.
        vdf_seq: Option<u64>,
        new_balance: Option<f64>,
    },
}

/// The core pipeline.
pub struct TollService {
    verifier: IngestVerifier,
    trust: Arc<TrustEngine>,
    fraud: FraudDetector,
    cards: Arc<dyn CardStore>,
    decisions: Arc<dyn DecisionStore>,
    healing: Arc<dyn HealingStore>,
    chain_workers: ChainWorkerHandle,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    locks: ReaderLocks,
}

impl TollService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: IngestVerifier,
        trust: Arc<TrustEngine>,
        fraud: FraudDetector,
        cards: Arc<dyn CardStore>,
        decisions: Arc<dyn DecisionStore>,
        healing: Arc<dyn HealingStore>,
        chain_workers: ChainWorkerHandle,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            verifier,
            trust,
            fraud,
            cards,
            decisions,
            healing,
            chain_workers,
            policy,
            clock,
            metrics,
            locks: ReaderLocks::new(),
        }
    }

    /// Process one inbound toll event end to end.
    pub async fn process_event(&self, event: TollEvent) -> Result<ProcessOutcome> {
        let lock = self.locks.lock_for(&event.reader_id);
        let _guard = lock.lock().await;

        // Authentication pipeline.
        let reader = match self.verifier.verify(&event).await? {
            VerifyOutcome::Accepted { reader } => reader,
            VerifyOutcome::Rejected { code, reader } => {
                Metrics::incr(&self.metrics.events_rejected);
                let trust = match (reject_violation(code), reader) {
                    (Some(class), Some(reader)) => Some(
                        self.trust
                            .penalize(&reader.reader_id, class, 1.0, &code.to_string())
                            .await?,
                    ),
                    (None, Some(reader)) => Some(TrustSnapshot {
                        trust_score: reader.trust_score,
                        status: reader.status,
                    }),
                    _ => None,
                };
                return Ok(ProcessOutcome::Rejected { code, trust });
            }
        };
        Metrics::incr(&self.metrics.events_accepted);

        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let event_id = Uuid::new_v4();

        // Card and tariff lookup.
        let card = self.cards.get(&event.tag_hash).await?;
        let amount = match &card {
            Some(card) => self
                .cards
                .tariff_for(card.vehicle_type)
                .await?
                .ok_or_else(|| TollError::TariffNotFound(card.vehicle_type.to_string()))?,
            None => 0.0,
        };

        // Fraud fusion.
        let suspicion = self
            .healing
            .suspicion_multiplier(&event.tag_hash, now)
            .await?;
        let verdict = self
            .fraud
            .evaluate(FraudInput {
                event: &event,
                card: card.as_ref(),
                amount,
                reader_status: reader.status,
                suspicion_multiplier: suspicion,
            })
            .await;

        let mut decision = verdict.decision;
        let mut rule_flags = verdict.rule_flags.clone();
        let mut reason_codes = verdict.reason_codes.clone();

        // Balance gate: a deduction that would drive the balance negative
        // is blocked and treated as balance manipulation.
        let mut insufficient = false;
        if decision == Decision::Allow {
            if let Some(card) = &card {
                if card.balance < amount {
                    decision = Decision::Block;
                    insufficient = true;
                    rule_flags.push(RuleFlag::InsufficientBalance);
                    reason_codes.push(RuleFlag::InsufficientBalance.to_string());
                }
            }
        }

        // Trust feedback.
        let trust = match decision {
            Decision::Allow => self.trust.reward_success(&reader.reader_id).await?,
            Decision::Block => {
                let class = block_violation(&rule_flags, &reason_codes, insufficient);
                // Rule violations are deterministic; only ML-driven blocks
                // carry model confidence.
                let confidence = if class == ViolationClass::FraudMl {
                    verdict.ml_b.unwrap_or(1.0)
                } else {
                    1.0
                };
                self.trust
                    .penalize(
                        &reader.reader_id,
                        class,
                        confidence,
                        &reason_codes.join(","),
                    )
                    .await?
            }
        };

        // Charge the card, then persist the decision; the charge is rolled
        // back if the decision log rejects the record.
        let mut new_balance = None;
        if let Some(mut card) = card.clone() {
            let charged = decision == Decision::Allow;
            let balance_before = card.balance;
            if charged {
                card.balance -= amount;
                new_balance = Some(card.balance);
            }
            card.last_seen = Some(now);
            self.cards.put(card.clone()).await?;

            let record = DecisionRecord {
                event_id,
                reader_id: event.reader_id.clone(),
                tag_hash: event.tag_hash.clone(),
                timestamp: event.timestamp,
                ml_a: verdict.ml_a,
                ml_b: verdict.ml_b,
                iso_flag: verdict.iso_flag,
                rule_flags: rule_flags.clone(),
                trust_snapshot: trust,
                decision,
                reason_codes: reason_codes.clone(),
                amount,
                decided_at: now,
            };
            if let Err(err) = self.decisions.append(record).await {
                if charged {
                    card.balance = balance_before;
                    self.cards.put(card).await?;
                }
                return Err(err);
            }
        } else {
            self.decisions
                .append(DecisionRecord {
                    event_id,
                    reader_id: event.reader_id.clone(),
                    tag_hash: event.tag_hash.clone(),
                    timestamp: event.timestamp,
                    ml_a: verdict.ml_a,
                    ml_b: verdict.ml_b,
                    iso_flag: verdict.iso_flag,
                    rule_flags: rule_flags.clone(),
                    trust_snapshot: trust,
                    decision,
                    reason_codes: reason_codes.clone(),
                    amount,
                    decided_at: now,
                })
                .await?;
        }

        match decision {
            Decision::Allow => Metrics::incr(&self.metrics.decisions_allowed),
            Decision::Block => Metrics::incr(&self.metrics.decisions_blocked),
        }

        // Sequence into the VDF chain.
        let vdf_seq = if policy.vdf.response_awaits_vdf {
            Some(
                self.chain_workers
                    .submit_and_wait(event_id, &event.reader_id, event.timestamp)
                    .await?,
            )
        } else {
            self.chain_workers
                .submit(event_id, &event.reader_id, event.timestamp)
                .await?;
            None
        };

        info!(
            %event_id,
            reader_id = %event.reader_id,
            decision = ?decision,
            score = trust.trust_score,
            vdf_seq,
            "toll event decided"
        );

        Ok(ProcessOutcome::Decided {
            event_id,
            decision,
            reason_codes,
            trust,
            vdf_seq,
            new_balance,
        })
    }
}

/// Violation class a rejection maps to, if any.
fn reject_violation(code: RejectCode) -> Option<ViolationClass> {
    match code {
        RejectCode::BadSignature => Some(ViolationClass::BadSignature),
        RejectCode::Replay => Some(ViolationClass::Replay),
        RejectCode::BadKeyVersion => Some(ViolationClass::BadKeyVersion),
        RejectCode::StaleTimestamp => Some(ViolationClass::StaleTimestamp),
        RejectCode::RateLimited => Some(ViolationClass::RateExceeded),
        RejectCode::UnknownReader | RejectCode::ReaderSuspended => None,
    }
}

/// Violation class for a blocked decision.
fn block_violation(
    rule_flags: &[RuleFlag],
    reason_codes: &[String],
    insufficient: bool,
) -> ViolationClass {
    if insufficient || rule_flags.contains(&RuleFlag::NonPositiveAmount) {
        ViolationClass::BalanceManipulation
    } else if reason_codes.iter().any(|r| r == "ML_ANOMALY")
        && rule_flags.is_empty()
    {
        ViolationClass::FraudMl
    } else {
        ViolationClass::FraudRule
    }
}
