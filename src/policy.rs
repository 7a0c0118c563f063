//! Declarative trust policy.
//!
//! Every threshold, weight, window and difficulty the engine consults lives
//! here, loaded from a JSON file and reloadable without restart. Readers of
//! the policy always see a complete snapshot: a reload parses into a fresh
//! `TrustPolicy` and swaps the shared `Arc` atomically, so a half-applied
//! policy is never observable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::domain::{VehicleType, ViolationClass};
use crate::infra::{Result, TollError};

/// Ingest verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestPolicy {
    /// Maximum allowed |now - event.timestamp| in seconds.
    pub max_drift_secs: i64,
    /// Token bucket refill rate, events per minute per reader.
    pub rate_per_minute: f64,
    /// Token bucket capacity per reader.
    pub rate_burst: u32,
    /// Outer deadline for one ingest verification; on expiry the verifier
    /// aborts before the nonce commit so no partial state is left behind.
    pub request_deadline_ms: u64,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_drift_secs: 120,
            rate_per_minute: 120.0,
            rate_burst: 20,
            request_deadline_ms: 2000,
        }
    }
}

/// Penalty weights per violation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyPolicy {
    /// Positive magnitudes; the engine applies them as negative deltas.
    pub base: HashMap<ViolationClass, f64>,
    pub weight: HashMap<ViolationClass, f64>,
    /// Quarantine severity contributed by each class (1..=3).
    pub severity: HashMap<ViolationClass, u8>,
    /// Additional classes that quarantine on a single occurrence, beyond
    /// the built-in critical set (replay, bad signature, balance
    /// manipulation).
    pub quarantine_on: Vec<ViolationClass>,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        use ViolationClass::*;
        let base = HashMap::from([
            (BadSignature, 40.0),
            (Replay, 40.0),
            (BalanceManipulation, 40.0),
            (BadKeyVersion, 10.0),
            (StaleTimestamp, 5.0),
            (RateExceeded, 5.0),
            (FraudRule, 15.0),
            (FraudMl, 10.0),
            (ProbationFailure, 10.0),
        ]);
        let weight = base.keys().map(|k| (*k, 1.0)).collect();
        let severity = HashMap::from([
            (BadSignature, 2),
            (Replay, 2),
            (BalanceManipulation, 3),
        ]);
        Self {
            base,
            weight,
            severity,
            quarantine_on: Vec::new(),
        }
    }
}

/// Status thresholds and restoration scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Score at or above which a non-quarantined reader is ACTIVE.
    pub trusted_floor: i32,
    /// Score at or above which (but below `trusted_floor`) it is DEGRADED.
    pub degraded_floor: i32,
    /// Score below which a reader is quarantined outright.
    pub quarantine_floor: i32,
    /// Recovered score at which a quarantined reader enters probation.
    pub probation_entry_floor: i32,
    /// Score assigned after a successful restoration.
    pub restore_score: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trusted_floor: 70,
            degraded_floor: 35,
            quarantine_floor: 25,
            probation_entry_floor: 40,
            restore_score: 75,
        }
    }
}

/// Logarithmic trust recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// No recovery within this many seconds of the last violation.
    pub min_gap_secs: i64,
    /// Points per ln(1 + hours).
    pub rate: f64,
    /// Maximum points recovered in one application.
    pub cap: f64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            min_gap_secs: 3600,
            rate: 5.0,
            cap: 25.0,
        }
    }
}

/// Clean-transaction rewards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardPolicy {
    /// Number of consecutive allowed events that earns one reward.
    pub streak: u64,
    pub clean_points: f64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            streak: 5,
            clean_points: 2.0,
        }
    }
}

/// Tag suspicion propagated on quarantine entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspicionPolicy {
    /// How far back to collect tags seen by the quarantined reader.
    pub window_secs: i64,
    /// How long the elevated sensitivity lasts.
    pub ttl_secs: i64,
    pub multiplier: f64,
}

impl Default for SuspicionPolicy {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            ttl_secs: 1800,
            multiplier: 1.5,
        }
    }
}

/// ML scorer variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerVariant {
    /// Feature-threshold scorer derived from the production models.
    Heuristic,
    /// Fixed scores, for tests.
    Mock,
    /// Always unavailable; fusion treats the scores as neutral.
    Null,
}

/// Fraud detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudPolicy {
    pub amount_ceiling: f64,
    /// Per-vehicle-type charge ceilings.
    pub type_ceilings: HashMap<VehicleType, f64>,
    pub duplicate_window_secs: i64,
    pub ml_block_threshold: f64,
    /// Window for cross-reader transaction counting.
    pub cross_window_secs: i64,
    /// Outlier multiplier over the active-peer mean.
    pub cross_multiplier: f64,
    /// Deadline for one scorer invocation.
    pub ml_deadline_ms: u64,
    pub scorer: ScorerVariant,
    /// Fixed score returned by the mock scorer.
    pub mock_score: f64,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self {
            amount_ceiling: 5000.0,
            type_ceilings: HashMap::from([
                (VehicleType::Car, 300.0),
                (VehicleType::Bus, 1000.0),
                (VehicleType::Truck, 2000.0),
            ]),
            duplicate_window_secs: 60,
            ml_block_threshold: 0.6,
            cross_window_secs: 600,
            cross_multiplier: 3.0,
            ml_deadline_ms: 250,
            scorer: ScorerVariant::Heuristic,
            mock_score: 0.0,
        }
    }
}

/// Peer-consensus restoration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusPolicy {
    /// Approvals / eligible active peers required.
    pub approval_ratio: f64,
    /// Voting window in seconds; expiry re-quarantines with escalated
    /// severity.
    pub timeout_secs: i64,
    pub min_voters: usize,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            approval_ratio: 0.6,
            timeout_secs: 86_400,
            min_voters: 2,
        }
    }
}

/// Probation challenge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengePolicy {
    pub max_attempts: u32,
    pub ttl_secs: i64,
    /// TIMING challenge response window.
    pub timing_window_ms: u64,
    /// Admin-whitelisted tag hashes usable for KNOWN_TAG challenges.
    pub known_tags: Vec<String>,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            ttl_secs: 3600,
            timing_window_ms: 5000,
            known_tags: Vec::new(),
        }
    }
}

/// VDF chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VdfPolicy {
    pub difficulty: u32,
    /// Number of proof checkpoints per link.
    pub checkpoint_granularity: u32,
    pub genesis_seed: String,
    /// Size of the append worker pool.
    pub workers: usize,
    /// When true, the ingest response waits for the link and carries its
    /// sequence number; when false the link is appended asynchronously and
    /// reconciliation guarantees exactly one link per decision.
    pub response_awaits_vdf: bool,
    /// Bounded capacity of the append queue.
    pub queue_capacity: usize,
    /// Permitted backward timestamp drift between adjacent links.
    pub reorder_tolerance_secs: i64,
}

impl Default for VdfPolicy {
    fn default() -> Self {
        Self {
            difficulty: 1000,
            checkpoint_granularity: 10,
            genesis_seed: "TOLLGATE_VDF_GENESIS".to_string(),
            workers: 1,
            response_awaits_vdf: true,
            queue_capacity: 256,
            reorder_tolerance_secs: 300,
        }
    }
}

/// Ledger client variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerVariant {
    /// JSON-over-HTTP submission to a relay endpoint.
    Http,
    /// Scriptable outcomes, for tests.
    Mock,
    /// Accepts everything locally; no external calls.
    Null,
}

/// Anchoring queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorPolicy {
    /// Links per anchor batch.
    pub batch_size: u64,
    /// Anchor a partial batch once the oldest pending link is this old.
    pub max_delay_secs: i64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Pending-anchor depth beyond which a warning counter increments.
    pub queue_max: usize,
    pub ledger: LedgerVariant,
    pub ledger_endpoint: String,
    pub ledger_deadline_ms: u64,
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_delay_secs: 30,
            backoff_base_ms: 1000,
            backoff_cap_ms: 300_000,
            queue_max: 100,
            ledger: LedgerVariant::Null,
            ledger_endpoint: String::new(),
            ledger_deadline_ms: 5000,
        }
    }
}

/// Background sweeper cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperPolicy {
    pub interval_secs: u64,
    /// Cross-reader stats snapshot refresh interval.
    pub cross_stats_interval_secs: u64,
}

impl Default for SweeperPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            cross_stats_interval_secs: 60,
        }
    }
}

/// Complete trust policy snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    pub ingest: IngestPolicy,
    pub penalties: PenaltyPolicy,
    pub thresholds: Thresholds,
    pub recovery: RecoveryPolicy,
    pub rewards: RewardPolicy,
    pub suspicion: SuspicionPolicy,
    pub fraud: FraudPolicy,
    pub consensus: ConsensusPolicy,
    pub challenges: ChallengePolicy,
    pub vdf: VdfPolicy,
    pub anchor: AnchorPolicy,
    pub sweeper: SweeperPolicy,
}

impl TrustPolicy {
    /// Parse a policy document, filling omitted sections with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TollError::Policy(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TollError::Policy(format!("read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Penalty magnitude for a class (0 when unconfigured).
    pub fn base_penalty(&self, class: ViolationClass) -> f64 {
        self.penalties.base.get(&class).copied().unwrap_or(0.0)
    }

    pub fn penalty_weight(&self, class: ViolationClass) -> f64 {
        self.penalties.weight.get(&class).copied().unwrap_or(1.0)
    }

    pub fn quarantine_severity(&self, class: ViolationClass) -> u8 {
        self.penalties
            .severity
            .get(&class)
            .copied()
            .unwrap_or(1)
            .clamp(1, 3)
    }

    pub fn type_ceiling(&self, vehicle_type: VehicleType) -> Option<f64> {
        self.fraud.type_ceilings.get(&vehicle_type).copied()
    }

    /// Nonce records older than this are eligible for garbage collection.
    pub fn nonce_retention_secs(&self) -> i64 {
        2 * self.ingest.max_drift_secs
    }
}

/// Shared, reloadable policy snapshot.
///
/// `load()` hands out the current `Arc`; `reload()` swaps in a fully parsed
/// replacement.
pub struct PolicyHandle {
    current: RwLock<Arc<TrustPolicy>>,
    path: Option<PathBuf>,
}

impl PolicyHandle {
    /// Handle over a fixed in-memory policy (tests, embedded defaults).
    pub fn fixed(policy: TrustPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
            path: None,
        }
    }

    /// Load the policy from a file and remember the path for reloads.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let policy = TrustPolicy::from_file(&path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(policy)),
            path: Some(path),
        })
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<TrustPolicy> {
        self.current.read().expect("policy lock poisoned").clone()
    }

    /// Re-read the policy file and swap the snapshot.
    pub fn reload(&self) -> Result<Arc<TrustPolicy>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| TollError::Policy("no policy file configured".to_string()))?;
        let fresh = Arc::new(TrustPolicy::from_file(path)?);
        *self.current.write().expect("policy lock poisoned") = fresh.clone();
        Ok(fresh)
    }

    /// Replace the snapshot directly (admin override, tests).
    pub fn swap(&self, policy: TrustPolicy) {
        *self.current.write().expect("policy lock poisoned") = Arc::new(policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let p = TrustPolicy::default();
        assert!(p.thresholds.degraded_floor < p.thresholds.trusted_floor);
        assert!(p.thresholds.quarantine_floor <= p.thresholds.degraded_floor);
        assert_eq!(p.base_penalty(ViolationClass::Replay), 40.0);
        assert_eq!(p.quarantine_severity(ViolationClass::BalanceManipulation), 3);
        assert_eq!(p.nonce_retention_secs(), 240);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p = TrustPolicy::from_json(
            r#"{
                "thresholds": { "trusted_floor": 80 },
                "vdf": { "difficulty": 50 }
            }"#,
        )
        .unwrap();
        assert_eq!(p.thresholds.trusted_floor, 80);
        // Untouched fields keep defaults.
        assert_eq!(p.thresholds.degraded_floor, 35);
        assert_eq!(p.vdf.difficulty, 50);
        assert_eq!(p.vdf.checkpoint_granularity, 10);
    }

    #[test]
    fn malformed_json_is_a_policy_error() {
        let err = TrustPolicy::from_json("{not json").unwrap_err();
        assert!(matches!(err, TollError::Policy(_)));
    }

    #[test]
    fn penalty_maps_parse_with_enum_keys() {
        let p = TrustPolicy::from_json(
            r#"{
                "penalties": {
                    "base": { "REPLAY": 55.0 },
                    "weight": { "REPLAY": 0.5 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(p.base_penalty(ViolationClass::Replay), 55.0);
        assert_eq!(p.penalty_weight(ViolationClass::Replay), 0.5);
        // Classes absent from the override map fall back to 0 / 1.
        assert_eq!(p.base_penalty(ViolationClass::BadSignature), 0.0);
        assert_eq!(p.penalty_weight(ViolationClass::BadSignature), 1.0);
    }

    #[test]
    fn handle_swap_is_visible_to_loads() {
        let handle = PolicyHandle::fixed(TrustPolicy::default());
        assert_eq!(handle.load().vdf.difficulty, 1000);

        let mut replacement = TrustPolicy::default();
        replacement.vdf.difficulty = 1;
        handle.swap(replacement);
        assert_eq!(handle.load().vdf.difficulty, 1);
    }

    #[test]
    fn reload_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "vdf": {{ "difficulty": 7 }} }}"#).unwrap();

        let handle = PolicyHandle::from_file(file.path()).unwrap();
        assert_eq!(handle.load().vdf.difficulty, 7);

        file.as_file().set_len(0).unwrap();
        let mut f = file.reopen().unwrap();
        write!(f, r#"{{ "vdf": {{ "difficulty": 9 }} }}"#).unwrap();

        handle.reload().unwrap();
        assert_eq!(handle.load().vdf.difficulty, 9);
    }
}
