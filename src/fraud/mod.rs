//! Fraud decision fusion.
//!
//! Combines the rule layer, the external ML scorers and the cross-reader
//! outlier signal into a single allow/block decision. Scorer failures and
//! deadline overruns degrade to neutral scores rather than blocking the
//! pipeline, and reason codes carry every contributing flag, not only the
//! first.

pub mod scorer;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::domain::{Card, Decision, ReaderStatus, RuleFlag, TollEvent};
use crate::policy::PolicyHandle;

pub use scorer::{scorer_for, FeatureVector, MlScorer, MlScores, ScorerError};
pub use stats::{compute_stats, CrossReaderStats, StatsHandle};

/// Inputs to one fraud evaluation.
pub struct FraudInput<'a> {
    pub event: &'a TollEvent,
    pub card: Option<&'a Card>,
    /// Tariff amount to be charged.
    pub amount: f64,
    pub reader_status: ReaderStatus,
    /// Highest active tag-suspicion multiplier (1.0 = normal).
    pub suspicion_multiplier: f64,
}

/// Output of the fusion.
#[derive(Debug, Clone)]
pub struct FraudVerdict {
    pub rule_flags: Vec<RuleFlag>,
    pub ml_a: Option<f64>,
    pub ml_b: Option<f64>,
    pub iso_flag: u8,
    pub decision: Decision,
    pub reason_codes: Vec<String>,
}

/// Rule + ML + cross-reader fusion.
pub struct FraudDetector {
    scorer: Box<dyn MlScorer>,
    stats: Arc<StatsHandle>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
}

impl FraudDetector {
    pub fn new(
        scorer: Box<dyn MlScorer>,
        stats: Arc<StatsHandle>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scorer,
            stats,
            policy,
            clock,
        }
    }

    pub async fn evaluate(&self, input: FraudInput<'_>) -> FraudVerdict {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let stats = self.stats.load();

        // Rule layer.
        let mut rule_flags = Vec::new();
        if input.card.is_none() {
            rule_flags.push(RuleFlag::UnknownCard);
        }
        if let Some(card) = input.card {
            if input.amount <= 0.0 {
                rule_flags.push(RuleFlag::NonPositiveAmount);
            }
            if input.amount > policy.fraud.amount_ceiling {
                rule_flags.push(RuleFlag::AmountCeiling);
            }
            if let Some(ceiling) = policy.type_ceiling(card.vehicle_type) {
                if input.amount > ceiling {
                    rule_flags.push(RuleFlag::TypeTariffMismatch);
                }
            }
            if let Some(last_seen) = card.last_seen {
                if now - last_seen < policy.fraud.duplicate_window_secs {
                    rule_flags.push(RuleFlag::DuplicateScanWindow);
                }
            }
        }
        if stats.is_outlier(&input.event.reader_id, policy.fraud.cross_multiplier) {
            rule_flags.push(RuleFlag::CrossOutlier);
        }

        // ML layer with a bounded deadline; unavailability is neutral.
        let features = FeatureVector {
            amount: input.amount,
            vehicle_type: input
                .card
                .map(|c| c.vehicle_type)
                .unwrap_or(crate::domain::VehicleType::Car),
            seconds_since_last_seen: input.card.and_then(|c| c.last_seen).map(|t| now - t),
            reader_window_count: stats.count_for(&input.event.reader_id),
        };
        let deadline = Duration::from_millis(policy.fraud.ml_deadline_ms);
        let scores = match tokio::time::timeout(deadline, self.scorer.score(&features)).await {
            Ok(Ok(scores)) => Some(scores),
            Ok(Err(err)) => {
                debug!(%err, "ml scorer unavailable, using neutral scores");
                None
            }
            Err(_) => {
                debug!("ml scorer deadline exceeded, using neutral scores");
                None
            }
        };

        // Tag suspicion raises effective ML sensitivity.
        let boost = input.suspicion_multiplier.max(1.0);
        let ml_a = scores.map(|s| (s.model_a * boost).min(1.0));
        let ml_b = scores.map(|s| (s.model_b * boost).min(1.0));
        let iso_flag = u8::from(scores.map(|s| s.iso_flag).unwrap_or(false));

        // Fusion.
        let critical_rule = rule_flags.iter().any(|f| f.is_critical());
        let ml_block = match (ml_a, ml_b) {
            (Some(a), Some(b)) => {
                a >= policy.fraud.ml_block_threshold
                    && b >= policy.fraud.ml_block_threshold
                    && iso_flag == 1
            }
            _ => false,
        };
        let degraded_block =
            input.reader_status == ReaderStatus::Degraded && !rule_flags.is_empty();

        let decision = if critical_rule || ml_block || degraded_block {
            Decision::Block
        } else {
            Decision::Allow
        };

        let mut reason_codes: Vec<String> =
            rule_flags.iter().map(|f| f.to_string()).collect();
        if ml_block {
            reason_codes.push("ML_ANOMALY".to_string());
        }
        if degraded_block {
            reason_codes.push("DEGRADED_READER".to_string());
        }

        FraudVerdict {
            rule_flags,
            ml_a,
            ml_b,
            iso_flag,
            decision,
            reason_codes,
        }
    }
}
