//! Toll events, rejection codes and decision records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound toll event as submitted by a reader.
///
/// Transient: once accepted it is persisted as a [`DecisionRecord`] and the
/// raw submission is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollEvent {
    /// Hex SHA-256 of the raw RFID UID.
    pub tag_hash: String,
    pub reader_id: String,
    /// Seconds since epoch, as signed by the reader.
    pub timestamp: i64,
    /// Reader-chosen random string, unique per reader within the replay
    /// window.
    pub nonce: String,
    /// Hex HMAC-SHA256 over `tag_hash || reader_id || timestamp || nonce`.
    pub signature: String,
    pub key_version: u32,
}

/// Why the ingest verifier rejected an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    UnknownReader,
    BadKeyVersion,
    BadSignature,
    Replay,
    StaleTimestamp,
    RateLimited,
    ReaderSuspended,
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectCode::UnknownReader => "UNKNOWN_READER",
            RejectCode::BadKeyVersion => "BAD_KEY_VERSION",
            RejectCode::BadSignature => "BAD_SIGNATURE",
            RejectCode::Replay => "REPLAY",
            RejectCode::StaleTimestamp => "STALE_TIMESTAMP",
            RejectCode::RateLimited => "RATE_LIMITED",
            RejectCode::ReaderSuspended => "READER_SUSPENDED",
        };
        f.write_str(s)
    }
}

/// Final business outcome of an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
}

/// Rule-layer fraud flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleFlag {
    NonPositiveAmount,
    AmountCeiling,
    TypeTariffMismatch,
    DuplicateScanWindow,
    CrossOutlier,
    InsufficientBalance,
    UnknownCard,
}

impl RuleFlag {
    /// Critical flags force a block on their own.
    pub fn is_critical(&self) -> bool {
        matches!(self, RuleFlag::NonPositiveAmount | RuleFlag::UnknownCard)
    }
}

impl std::fmt::Display for RuleFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleFlag::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            RuleFlag::AmountCeiling => "AMOUNT_CEILING",
            RuleFlag::TypeTariffMismatch => "TYPE_TARIFF_MISMATCH",
            RuleFlag::DuplicateScanWindow => "DUPLICATE_SCAN_WINDOW",
            RuleFlag::CrossOutlier => "CROSS_OUTLIER",
            RuleFlag::InsufficientBalance => "INSUFFICIENT_BALANCE",
            RuleFlag::UnknownCard => "UNKNOWN_CARD",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a reader's trust, embedded in responses and records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub trust_score: i32,
    pub status: super::ReaderStatus,
}

/// Append-only record of one processed toll event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub event_id: Uuid,
    pub reader_id: String,
    pub tag_hash: String,
    /// Reader-signed timestamp (unix seconds).
    pub timestamp: i64,
    pub ml_a: Option<f64>,
    pub ml_b: Option<f64>,
    pub iso_flag: u8,
    pub rule_flags: Vec<RuleFlag>,
    pub trust_snapshot: TrustSnapshot,
    pub decision: Decision,
    pub reason_codes: Vec<String>,
    pub amount: f64,
    /// Unix seconds the decision was recorded.
    pub decided_at: i64,
}
