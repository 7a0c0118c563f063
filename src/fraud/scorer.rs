//! ML scorer collaborators.
//!
//! The scoring models are external: the engine only depends on the
//! [`MlScorer`] contract. Three variants are provided: the heuristic
//! scorer distilled from the production feature thresholds, a fixed mock
//! for tests, and a null scorer whose unavailability exercises the
//! neutral-score degradation path.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::VehicleType;
use crate::policy::ScorerVariant;

/// Features extracted from one accepted event.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureVector {
    pub amount: f64,
    pub vehicle_type: VehicleType,
    /// Seconds since this tag was last scanned, if known.
    pub seconds_since_last_seen: Option<i64>,
    /// Reader transaction count in the cross-reader window.
    pub reader_window_count: u64,
}

/// Scores returned by the model collaborators.
#[derive(Debug, Clone, Copy)]
pub struct MlScores {
    pub model_a: f64,
    pub model_b: f64,
    pub iso_flag: bool,
}

/// Scorer-side failures; all of them degrade to neutral scores.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

/// Contract for the external scoring models.
#[async_trait]
pub trait MlScorer: Send + Sync {
    async fn score(&self, features: &FeatureVector) -> Result<MlScores, ScorerError>;
}

/// Feature-threshold scorer mirroring the trained models' behavior.
pub struct HeuristicScorer;

#[async_trait]
impl MlScorer for HeuristicScorer {
    async fn score(&self, features: &FeatureVector) -> Result<MlScores, ScorerError> {
        let mut base: f64 = 0.1;
        if features.amount > 1000.0 {
            base += 0.3;
        }
        if features.amount <= 0.0 {
            base += 0.5;
        }
        if matches!(features.seconds_since_last_seen, Some(secs) if secs < 60) {
            base += 0.2;
        }
        if features.reader_window_count > 100 {
            base += 0.2;
        }

        let model_b = base.min(0.9);
        let model_a = (base * 0.8).min(0.85);
        Ok(MlScores {
            model_a,
            model_b,
            iso_flag: base > 0.5,
        })
    }
}

/// Fixed-score mock for tests.
pub struct MockScorer {
    pub score: f64,
    pub iso_flag: bool,
}

#[async_trait]
impl MlScorer for MockScorer {
    async fn score(&self, _features: &FeatureVector) -> Result<MlScores, ScorerError> {
        Ok(MlScores {
            model_a: self.score,
            model_b: self.score,
            iso_flag: self.iso_flag,
        })
    }
}

/// Always-unavailable scorer; fusion treats its output as neutral.
pub struct NullScorer;

#[async_trait]
impl MlScorer for NullScorer {
    async fn score(&self, _features: &FeatureVector) -> Result<MlScores, ScorerError> {
        Err(ScorerError::Unavailable("null scorer".to_string()))
    }
}

/// Build the scorer selected by policy.
pub fn scorer_for(variant: ScorerVariant, mock_score: f64) -> Box<dyn MlScorer> {
    match variant {
        ScorerVariant::Heuristic => Box::new(HeuristicScorer),
        ScorerVariant::Mock => Box::new(MockScorer {
            score: mock_score,
            iso_flag: mock_score > 0.5,
        }),
        ScorerVariant::Null => Box::new(NullScorer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(amount: f64) -> FeatureVector {
        FeatureVector {
            amount,
            vehicle_type: VehicleType::Car,
            seconds_since_last_seen: None,
            reader_window_count: 0,
        }
    }

    #[tokio::test]
    async fn heuristic_scores_clean_transaction_low() {
        let scores = HeuristicScorer.score(&features(50.0)).await.unwrap();
        assert!(scores.model_a < 0.2);
        assert!(scores.model_b < 0.2);
        assert!(!scores.iso_flag);
    }

    #[tokio::test]
    async fn heuristic_flags_risky_transaction() {
        let mut f = features(2000.0);
        f.seconds_since_last_seen = Some(10);
        let scores = HeuristicScorer.score(&f).await.unwrap();
        assert!(scores.model_b >= 0.6);
        assert!(scores.iso_flag);
    }

    #[tokio::test]
    async fn null_scorer_is_unavailable() {
        assert!(NullScorer.score(&features(50.0)).await.is_err());
    }
}
