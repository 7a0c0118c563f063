//! Reader registry records and violation classes.

use serde::{Deserialize, Serialize};

/// Enforcement status of a reader.
///
/// `Suspended` and `Quarantined` both block ingest; quarantine additionally
/// requires the self-healing protocol (probation challenges + peer consensus)
/// before the reader can serve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReaderStatus {
    Active,
    Degraded,
    Suspended,
    Quarantined,
    Probation,
}

impl ReaderStatus {
    /// Whether ingest from this reader is blocked outright.
    pub fn blocks_ingest(&self) -> bool {
        matches!(self, ReaderStatus::Suspended | ReaderStatus::Quarantined)
    }
}

/// Violation classes the trust engine penalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationClass {
    BadSignature,
    Replay,
    BadKeyVersion,
    StaleTimestamp,
    RateExceeded,
    FraudRule,
    FraudMl,
    BalanceManipulation,
    ProbationFailure,
}

impl ViolationClass {
    /// Critical violations quarantine on a single occurrence regardless of
    /// the resulting score.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ViolationClass::BadSignature
                | ViolationClass::Replay
                | ViolationClass::BalanceManipulation
        )
    }
}

impl std::fmt::Display for ViolationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationClass::BadSignature => "BAD_SIGNATURE",
            ViolationClass::Replay => "REPLAY",
            ViolationClass::BadKeyVersion => "BAD_KEY_VERSION",
            ViolationClass::StaleTimestamp => "STALE_TIMESTAMP",
            ViolationClass::RateExceeded => "RATE_EXCEEDED",
            ViolationClass::FraudRule => "FRAUD_RULE",
            ViolationClass::FraudMl => "FRAUD_ML",
            ViolationClass::BalanceManipulation => "BALANCE_MANIPULATION",
            ViolationClass::ProbationFailure => "PROBATION_FAILURE",
        };
        f.write_str(s)
    }
}

/// A registered RFID reader.
///
/// Created by admin registration, mutated only by the trust engine and the
/// admin surface, never deleted (secrets are superseded by rotation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    pub reader_id: String,
    /// Per-reader HMAC secret. Never serialized out through the API layer.
    #[serde(skip_serializing, default)]
    pub secret: Vec<u8>,
    /// Monotonically increasing; events signed under an older version are
    /// rejected.
    pub key_version: u32,
    /// Trust score in [0, 100].
    pub trust_score: i32,
    pub status: ReaderStatus,
    /// Unix seconds of the most recent violation, if any.
    pub last_violation_at: Option<i64>,
    /// Unix seconds of the last trust-engine update (penalty, reward or
    /// decay application).
    pub last_update_at: i64,
    pub auth_failures: u64,
    pub replay_attempts: u64,
    pub consecutive_successes: u64,
    pub registered_at: i64,
}

impl Reader {
    pub fn new(reader_id: impl Into<String>, secret: Vec<u8>, now: i64) -> Self {
        Self {
            reader_id: reader_id.into(),
            secret,
            key_version: 1,
            trust_score: 100,
            status: ReaderStatus::Active,
            last_violation_at: None,
            last_update_at: now,
            auth_failures: 0,
            replay_attempts: 0,
            consecutive_successes: 0,
            registered_at: now,
        }
    }
}

/// One applied penalty or reward, kept for telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub reader_id: String,
    pub class: ViolationClass,
    /// Signed score delta that was applied (negative for penalties).
    pub delta: i32,
    pub detail: String,
    pub at: i64,
}
