//! Store trait definitions.
//!
//! Persistence is an external collaborator: every table the service touches
//! is reached through one of these traits, and the in-memory implementations
//! in [`super::memory`] back the default wiring and the test suites. Any
//! transactional key/index store can be substituted.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Anchor, Card, DecisionRecord, PeerVote, ProbationChallenge, QuarantineRecord, Reader,
    TagSuspicion, VdfLink, VehicleType, ViolationRecord,
};

use super::Result;

/// Reader registry: `reader_id → {secret, key_version, trust, status, …}`.
#[async_trait]
pub trait ReaderStore: Send + Sync {
    async fn get(&self, reader_id: &str) -> Result<Option<Reader>>;

    /// Insert or replace a reader record.
    async fn put(&self, reader: Reader) -> Result<()>;

    async fn list(&self) -> Result<Vec<Reader>>;
}

/// Nonce ledger with a composite unique key on `(reader_id, nonce)`.
#[async_trait]
pub trait NonceLedger: Send + Sync {
    /// Insert the pair; returns false (without mutating) when it already
    /// exists.
    async fn insert_if_absent(&self, reader_id: &str, nonce: &str, observed_at: i64)
        -> Result<bool>;

    async fn contains(&self, reader_id: &str, nonce: &str) -> Result<bool>;

    /// Drop records observed before the cutoff; returns how many were
    /// removed.
    async fn remove_observed_before(&self, cutoff: i64) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// Cards and tariffs.
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn get(&self, tag_hash: &str) -> Result<Option<Card>>;

    async fn put(&self, card: Card) -> Result<()>;

    async fn tariff_for(&self, vehicle_type: VehicleType) -> Result<Option<f64>>;

    async fn set_tariff(&self, vehicle_type: VehicleType, amount: f64) -> Result<()>;

    /// Sample of registered tag hashes (KNOWN_TAG challenge material).
    async fn sample_tags(&self, limit: usize) -> Result<Vec<String>>;
}

/// Append-only decision log.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn append(&self, record: DecisionRecord) -> Result<()>;

    async fn get(&self, event_id: Uuid) -> Result<Option<DecisionRecord>>;

    async fn exists(&self, event_id: Uuid) -> Result<bool>;

    /// All records in append order.
    async fn list_ordered(&self) -> Result<Vec<DecisionRecord>>;

    async fn recent(&self, limit: usize) -> Result<Vec<DecisionRecord>>;

    async fn count(&self) -> Result<u64>;

    /// Decisions recorded for a reader since the given unix time.
    async fn count_for_reader_since(&self, reader_id: &str, since: i64) -> Result<u64>;

    /// Distinct tag hashes a reader has produced decisions for since the
    /// given unix time.
    async fn tags_for_reader_since(&self, reader_id: &str, since: i64) -> Result<Vec<String>>;
}

/// VDF chain links, ordered by sequence number.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn head(&self) -> Result<Option<VdfLink>>;

    /// Append a link; the chain manager guarantees `seq = head + 1`.
    async fn append(&self, link: VdfLink) -> Result<()>;

    /// Raw overwrite of a stored link (recovery tooling; also how tamper
    /// scenarios are exercised in tests).
    async fn replace(&self, link: VdfLink) -> Result<()>;

    async fn get(&self, seq: u64) -> Result<Option<VdfLink>>;

    /// Links with `from <= seq <= to`, ascending.
    async fn range(&self, from: u64, to: u64) -> Result<Vec<VdfLink>>;

    async fn count(&self) -> Result<u64>;

    async fn contains_event(&self, event_id: Uuid) -> Result<bool>;

    async fn get_by_event(&self, event_id: Uuid) -> Result<Option<VdfLink>>;
}

/// Ledger anchors.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Insert or replace by `anchor_id`.
    async fn put(&self, anchor: Anchor) -> Result<()>;

    async fn get(&self, anchor_id: u64) -> Result<Option<Anchor>>;

    async fn pending(&self) -> Result<Vec<Anchor>>;

    async fn list(&self) -> Result<Vec<Anchor>>;

    /// Highest `seq_to` across all anchors, if any exist.
    async fn max_anchored_seq(&self) -> Result<Option<u64>>;

    async fn next_id(&self) -> Result<u64>;
}

/// Quarantines, probation challenges, peer votes and tag suspicions.
#[async_trait]
pub trait HealingStore: Send + Sync {
    async fn active_quarantine(&self, reader_id: &str) -> Result<Option<QuarantineRecord>>;

    async fn put_quarantine(&self, record: QuarantineRecord) -> Result<()>;

    async fn active_quarantines(&self) -> Result<Vec<QuarantineRecord>>;

    async fn put_challenge(&self, challenge: ProbationChallenge) -> Result<()>;

    async fn get_challenge(&self, challenge_id: Uuid) -> Result<Option<ProbationChallenge>>;

    async fn challenges_for(&self, quarantine_id: Uuid) -> Result<Vec<ProbationChallenge>>;

    /// Upsert on `(subject, voter)`: a re-cast vote overwrites.
    async fn put_vote(&self, vote: PeerVote) -> Result<()>;

    async fn votes_for(&self, subject_reader_id: &str) -> Result<Vec<PeerVote>>;

    async fn clear_votes_for(&self, subject_reader_id: &str) -> Result<()>;

    async fn put_suspicion(&self, suspicion: TagSuspicion) -> Result<()>;

    /// Highest active multiplier for the tag (1.0 when none).
    async fn suspicion_multiplier(&self, tag_hash: &str, now: i64) -> Result<f64>;

    async fn clear_suspicions_from(&self, reader_id: &str) -> Result<()>;

    async fn remove_expired_suspicions(&self, now: i64) -> Result<usize>;
}

/// Applied penalties and rewards, for telemetry.
#[async_trait]
pub trait ViolationLog: Send + Sync {
    async fn append(&self, record: ViolationRecord) -> Result<()>;

    async fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>>;

    async fn count_for_reader(&self, reader_id: &str) -> Result<u64>;
}
