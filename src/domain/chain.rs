//! VDF chain links and ledger anchors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{hash256_hex, hash256_hex_vec, Hash256};

/// One link in the VDF chain.
///
/// Invariants (for `seq > 0`):
/// - `vdf_input = SHA256(prev_output || event_id || reader_id || timestamp_le)`
/// - `vdf_output = VDF(vdf_input, difficulty)`
/// - `prev_output` equals the previous link's `vdf_output`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdfLink {
    pub seq: u64,
    /// Nil UUID for the genesis link.
    pub event_id: Uuid,
    pub reader_id: String,
    /// Reader-signed event timestamp; 0 for genesis.
    pub timestamp: i64,
    #[serde(with = "hash256_hex")]
    pub prev_output: Hash256,
    #[serde(with = "hash256_hex")]
    pub vdf_input: Hash256,
    #[serde(with = "hash256_hex")]
    pub vdf_output: Hash256,
    /// Intermediate hashes sampled at fixed intervals, used to verify the
    /// output without replaying the whole delay in one sequential pass.
    #[serde(with = "hash256_hex_vec")]
    pub proof_checkpoints: Vec<Hash256>,
    pub difficulty: u32,
    /// Unix seconds the link was computed.
    pub computed_at: i64,
}

impl VdfLink {
    pub fn is_genesis(&self) -> bool {
        self.seq == 0
    }
}

/// How a chain broke, when verification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TamperClass {
    /// Stored output does not match recomputation from the checkpoints.
    VdfMismatch,
    /// `prev_output` does not equal the prior link's `vdf_output`.
    PrevPointerBroken,
    /// A decision record exists that no link references.
    Inserted,
    /// A link references a decision record that no longer exists.
    Deleted,
    /// Link timestamps regress beyond the configured tolerance.
    Reordered,
}

/// Result of a full-chain verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReport {
    pub valid: bool,
    pub links_verified: u64,
    pub first_broken_seq: Option<u64>,
    pub class: Option<TamperClass>,
    pub detail: Option<String>,
}

impl ChainReport {
    pub fn ok(links_verified: u64) -> Self {
        Self {
            valid: true,
            links_verified,
            first_broken_seq: None,
            class: None,
            detail: None,
        }
    }

    pub fn broken(
        links_verified: u64,
        seq: u64,
        class: TamperClass,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            links_verified,
            first_broken_seq: Some(seq),
            class: Some(class),
            detail: Some(detail.into()),
        }
    }
}

/// Lifecycle of a ledger anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorStatus {
    Pending,
    Sent,
    Failed,
}

/// One submission to the external ledger covering a contiguous range of
/// chain links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_id: u64,
    pub seq_from: u64,
    pub seq_to: u64,
    /// Merkle root over the batch's `(seq, vdf_output)` pairs; doubles as the
    /// idempotency reference at the ledger.
    #[serde(with = "hash256_hex")]
    pub root_hash: Hash256,
    pub ledger_receipt: Option<String>,
    pub status: AnchorStatus,
    pub attempts: u32,
    /// Unix seconds of the last submission attempt.
    pub last_attempt: Option<i64>,
    /// Unix seconds before which the worker will not retry.
    pub next_attempt_at: i64,
    pub created_at: i64,
}
