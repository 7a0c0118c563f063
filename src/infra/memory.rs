//! In-memory store implementations.
//!
//! Default wiring for development and the test suites; production
//! deployments substitute implementations of the same traits over a
//! transactional store. Locks are never held across await points.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Anchor, Card, DecisionRecord, PeerVote, ProbationChallenge, QuarantineRecord, Reader,
    TagSuspicion, VdfLink, VehicleType, ViolationRecord,
};

use super::traits::{
    AnchorStore, CardStore, ChainStore, DecisionStore, HealingStore, NonceLedger, ReaderStore,
    ViolationLog,
};
use super::Result;

/// Reader registry backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryReaderStore {
    readers: RwLock<HashMap<String, Reader>>,
}

impl MemoryReaderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReaderStore for MemoryReaderStore {
    async fn get(&self, reader_id: &str) -> Result<Option<Reader>> {
        Ok(self.readers.read().unwrap().get(reader_id).cloned())
    }

    async fn put(&self, reader: Reader) -> Result<()> {
        self.readers
            .write()
            .unwrap()
            .insert(reader.reader_id.clone(), reader);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Reader>> {
        let mut readers: Vec<Reader> = self.readers.read().unwrap().values().cloned().collect();
        readers.sort_by(|a, b| a.reader_id.cmp(&b.reader_id));
        Ok(readers)
    }
}

/// Nonce ledger with `(reader_id, nonce)` uniqueness.
#[derive(Default)]
pub struct MemoryNonceLedger {
    seen: RwLock<HashMap<(String, String), i64>>,
}

impl MemoryNonceLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceLedger for MemoryNonceLedger {
    async fn insert_if_absent(
        &self,
        reader_id: &str,
        nonce: &str,
        observed_at: i64,
    ) -> Result<bool> {
        let mut seen = self.seen.write().unwrap();
        let key = (reader_id.to_string(), nonce.to_string());
        if seen.contains_key(&key) {
            return Ok(false);
        }
        seen.insert(key, observed_at);
        Ok(true)
    }

    async fn contains(&self, reader_id: &str, nonce: &str) -> Result<bool> {
        let key = (reader_id.to_string(), nonce.to_string());
        Ok(self.seen.read().unwrap().contains_key(&key))
    }

    async fn remove_observed_before(&self, cutoff: i64) -> Result<usize> {
        let mut seen = self.seen.write().unwrap();
        let before = seen.len();
        seen.retain(|_, observed_at| *observed_at >= cutoff);
        Ok(before - seen.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.seen.read().unwrap().len())
    }
}

/// Cards plus the tariff table.
#[derive(Default)]
pub struct MemoryCardStore {
    cards: RwLock<HashMap<String, Card>>,
    tariffs: RwLock<HashMap<VehicleType, f64>>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    async fn get(&self, tag_hash: &str) -> Result<Option<Card>> {
        Ok(self.cards.read().unwrap().get(tag_hash).cloned())
    }

    async fn put(&self, card: Card) -> Result<()> {
        self.cards
            .write()
            .unwrap()
            .insert(card.tag_hash.clone(), card);
        Ok(())
    }

    async fn tariff_for(&self, vehicle_type: VehicleType) -> Result<Option<f64>> {
        Ok(self.tariffs.read().unwrap().get(&vehicle_type).copied())
    }

    async fn set_tariff(&self, vehicle_type: VehicleType, amount: f64) -> Result<()> {
        self.tariffs.write().unwrap().insert(vehicle_type, amount);
        Ok(())
    }

    async fn sample_tags(&self, limit: usize) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self.cards.read().unwrap().keys().cloned().collect();
        tags.sort();
        tags.truncate(limit);
        Ok(tags)
    }
}

/// Append-only decision log.
#[derive(Default)]
pub struct MemoryDecisionStore {
    records: RwLock<Vec<DecisionRecord>>,
    by_event: RwLock<HashMap<Uuid, usize>>,
}

impl MemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for MemoryDecisionStore {
    async fn append(&self, record: DecisionRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let mut by_event = self.by_event.write().unwrap();
        by_event.insert(record.event_id, records.len());
        records.push(record);
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<DecisionRecord>> {
        let by_event = self.by_event.read().unwrap();
        let records = self.records.read().unwrap();
        Ok(by_event.get(&event_id).map(|&i| records[i].clone()))
    }

    async fn exists(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.by_event.read().unwrap().contains_key(&event_id))
    }

    async fn list_ordered(&self) -> Result<Vec<DecisionRecord>> {
        Ok(self.records.read().unwrap().clone())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DecisionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().unwrap().len() as u64)
    }

    async fn count_for_reader_since(&self, reader_id: &str, since: i64) -> Result<u64> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.reader_id == reader_id && r.decided_at >= since)
            .count() as u64)
    }

    async fn tags_for_reader_since(&self, reader_id: &str, since: i64) -> Result<Vec<String>> {
        let records = self.records.read().unwrap();
        let tags: HashSet<String> = records
            .iter()
            .filter(|r| r.reader_id == reader_id && r.decided_at >= since)
            .map(|r| r.tag_hash.clone())
            .collect();
        Ok(tags.into_iter().collect())
    }
}

/// Chain links keyed by sequence number.
#[derive(Default)]
pub struct MemoryChainStore {
    links: RwLock<BTreeMap<u64, VdfLink>>,
    events: RwLock<HashSet<Uuid>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn head(&self) -> Result<Option<VdfLink>> {
        Ok(self
            .links
            .read()
            .unwrap()
            .last_key_value()
            .map(|(_, link)| link.clone()))
    }

    async fn append(&self, link: VdfLink) -> Result<()> {
        self.events.write().unwrap().insert(link.event_id);
        self.links.write().unwrap().insert(link.seq, link);
        Ok(())
    }

    async fn replace(&self, link: VdfLink) -> Result<()> {
        self.links.write().unwrap().insert(link.seq, link);
        Ok(())
    }

    async fn get(&self, seq: u64) -> Result<Option<VdfLink>> {
        Ok(self.links.read().unwrap().get(&seq).cloned())
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<VdfLink>> {
        Ok(self
            .links
            .read()
            .unwrap()
            .range(from..=to)
            .map(|(_, link)| link.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.links.read().unwrap().len() as u64)
    }

    async fn contains_event(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.events.read().unwrap().contains(&event_id))
    }

    async fn get_by_event(&self, event_id: Uuid) -> Result<Option<VdfLink>> {
        Ok(self
            .links
            .read()
            .unwrap()
            .values()
            .find(|link| link.event_id == event_id)
            .cloned())
    }
}

/// Anchors keyed by id.
#[derive(Default)]
pub struct MemoryAnchorStore {
    anchors: RwLock<BTreeMap<u64, Anchor>>,
    next_id: AtomicU64,
}

impl MemoryAnchorStore {
    pub fn new() -> Self {
        Self {
            anchors: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl AnchorStore for MemoryAnchorStore {
    async fn put(&self, anchor: Anchor) -> Result<()> {
        self.anchors
            .write()
            .unwrap()
            .insert(anchor.anchor_id, anchor);
        Ok(())
    }

    async fn get(&self, anchor_id: u64) -> Result<Option<Anchor>> {
        Ok(self.anchors.read().unwrap().get(&anchor_id).cloned())
    }

    async fn pending(&self) -> Result<Vec<Anchor>> {
        Ok(self
            .anchors
            .read()
            .unwrap()
            .values()
            .filter(|a| a.status == crate::domain::AnchorStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Anchor>> {
        Ok(self.anchors.read().unwrap().values().cloned().collect())
    }

    async fn max_anchored_seq(&self) -> Result<Option<u64>> {
        Ok(self
            .anchors
            .read()
            .unwrap()
            .values()
            .map(|a| a.seq_to)
            .max())
    }

    async fn next_id(&self) -> Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Quarantines, challenges, votes and suspicions.
#[derive(Default)]
pub struct MemoryHealingStore {
    quarantines: RwLock<Vec<QuarantineRecord>>,
    challenges: RwLock<HashMap<Uuid, ProbationChallenge>>,
    votes: RwLock<HashMap<(String, String), PeerVote>>,
    suspicions: RwLock<Vec<TagSuspicion>>,
}

impl MemoryHealingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealingStore for MemoryHealingStore {
    async fn active_quarantine(&self, reader_id: &str) -> Result<Option<QuarantineRecord>> {
        Ok(self
            .quarantines
            .read()
            .unwrap()
            .iter()
            .filter(|q| q.reader_id == reader_id && q.is_active())
            .max_by_key(|q| q.entered_at)
            .cloned())
    }

    async fn put_quarantine(&self, record: QuarantineRecord) -> Result<()> {
        let mut quarantines = self.quarantines.write().unwrap();
        if let Some(existing) = quarantines
            .iter_mut()
            .find(|q| q.quarantine_id == record.quarantine_id)
        {
            *existing = record;
        } else {
            quarantines.push(record);
        }
        Ok(())
    }

    async fn active_quarantines(&self) -> Result<Vec<QuarantineRecord>> {
        Ok(self
            .quarantines
            .read()
            .unwrap()
            .iter()
            .filter(|q| q.is_active())
            .cloned()
            .collect())
    }

    async fn put_challenge(&self, challenge: ProbationChallenge) -> Result<()> {
        self.challenges
            .write()
            .unwrap()
            .insert(challenge.challenge_id, challenge);
        Ok(())
    }

    async fn get_challenge(&self, challenge_id: Uuid) -> Result<Option<ProbationChallenge>> {
        Ok(self.challenges.read().unwrap().get(&challenge_id).cloned())
    }

    async fn challenges_for(&self, quarantine_id: Uuid) -> Result<Vec<ProbationChallenge>> {
        let mut challenges: Vec<ProbationChallenge> = self
            .challenges
            .read()
            .unwrap()
            .values()
            .filter(|c| c.quarantine_id == quarantine_id)
            .cloned()
            .collect();
        challenges.sort_by_key(|c| c.issued_at);
        Ok(challenges)
    }

    async fn put_vote(&self, vote: PeerVote) -> Result<()> {
        let key = (
            vote.subject_reader_id.clone(),
            vote.voter_reader_id.clone(),
        );
        self.votes.write().unwrap().insert(key, vote);
        Ok(())
    }

    async fn votes_for(&self, subject_reader_id: &str) -> Result<Vec<PeerVote>> {
        Ok(self
            .votes
            .read()
            .unwrap()
            .values()
            .filter(|v| v.subject_reader_id == subject_reader_id)
            .cloned()
            .collect())
    }

    async fn clear_votes_for(&self, subject_reader_id: &str) -> Result<()> {
        self.votes
            .write()
            .unwrap()
            .retain(|(subject, _), _| subject != subject_reader_id);
        Ok(())
    }

    async fn put_suspicion(&self, suspicion: TagSuspicion) -> Result<()> {
        let mut suspicions = self.suspicions.write().unwrap();
        if let Some(existing) = suspicions.iter_mut().find(|s| {
            s.tag_hash == suspicion.tag_hash && s.source_reader_id == suspicion.source_reader_id
        }) {
            *existing = suspicion;
        } else {
            suspicions.push(suspicion);
        }
        Ok(())
    }

    async fn suspicion_multiplier(&self, tag_hash: &str, now: i64) -> Result<f64> {
        Ok(self
            .suspicions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.tag_hash == tag_hash && s.expires_at > now)
            .map(|s| s.multiplier)
            .fold(1.0, f64::max))
    }

    async fn clear_suspicions_from(&self, reader_id: &str) -> Result<()> {
        self.suspicions
            .write()
            .unwrap()
            .retain(|s| s.source_reader_id != reader_id);
        Ok(())
    }

    async fn remove_expired_suspicions(&self, now: i64) -> Result<usize> {
        let mut suspicions = self.suspicions.write().unwrap();
        let before = suspicions.len();
        suspicions.retain(|s| s.expires_at > now);
        Ok(before - suspicions.len())
    }
}

/// Violation telemetry log.
#[derive(Default)]
pub struct MemoryViolationLog {
    records: RwLock<Vec<ViolationRecord>>,
}

impl MemoryViolationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViolationLog for MemoryViolationLog {
    async fn append(&self, record: ViolationRecord) -> Result<()> {
        self.records.write().unwrap().push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn count_for_reader(&self, reader_id: &str) -> Result<u64> {
        Ok(self
            .records
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.reader_id == reader_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnchorStatus, ReaderStatus};

    #[tokio::test]
    async fn nonce_ledger_rejects_duplicates() {
        let ledger = MemoryNonceLedger::new();
        assert!(ledger.insert_if_absent("R1", "n1", 100).await.unwrap());
        assert!(!ledger.insert_if_absent("R1", "n1", 101).await.unwrap());
        // Same nonce under a different reader is a distinct key.
        assert!(ledger.insert_if_absent("R2", "n1", 100).await.unwrap());
        assert_eq!(ledger.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn nonce_gc_by_observation_time() {
        let ledger = MemoryNonceLedger::new();
        ledger.insert_if_absent("R1", "old", 100).await.unwrap();
        ledger.insert_if_absent("R1", "new", 500).await.unwrap();
        let removed = ledger.remove_observed_before(200).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!ledger.contains("R1", "old").await.unwrap());
        assert!(ledger.contains("R1", "new").await.unwrap());
    }

    #[tokio::test]
    async fn reader_store_roundtrip() {
        let store = MemoryReaderStore::new();
        let reader = Reader::new("R1", b"s".to_vec(), 0);
        store.put(reader).await.unwrap();

        let mut loaded = store.get("R1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ReaderStatus::Active);

        loaded.trust_score = 55;
        store.put(loaded).await.unwrap();
        assert_eq!(store.get("R1").await.unwrap().unwrap().trust_score, 55);
    }

    #[tokio::test]
    async fn chain_store_head_and_range() {
        let store = MemoryChainStore::new();
        for seq in 0..5u64 {
            store
                .append(VdfLink {
                    seq,
                    event_id: Uuid::new_v4(),
                    reader_id: "R1".to_string(),
                    timestamp: seq as i64,
                    prev_output: [0; 32],
                    vdf_input: [0; 32],
                    vdf_output: [seq as u8; 32],
                    proof_checkpoints: vec![],
                    difficulty: 1,
                    computed_at: 0,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.head().await.unwrap().unwrap().seq, 4);
        assert_eq!(store.range(1, 3).await.unwrap().len(), 3);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn anchor_store_pending_and_max_seq() {
        let store = MemoryAnchorStore::new();
        for (id, status) in [(1u64, AnchorStatus::Sent), (2, AnchorStatus::Pending)] {
            store
                .put(Anchor {
                    anchor_id: id,
                    seq_from: id * 10,
                    seq_to: id * 10 + 9,
                    root_hash: [0; 32],
                    ledger_receipt: None,
                    status,
                    attempts: 0,
                    last_attempt: None,
                    next_attempt_at: 0,
                    created_at: 0,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.pending().await.unwrap().len(), 1);
        assert_eq!(store.max_anchored_seq().await.unwrap(), Some(29));
    }

    #[tokio::test]
    async fn votes_upsert_on_subject_voter() {
        use crate::domain::Vote;
        let store = MemoryHealingStore::new();
        store
            .put_vote(PeerVote {
                subject_reader_id: "R1".to_string(),
                voter_reader_id: "R2".to_string(),
                vote: Vote::Reject,
                cast_at: 10,
            })
            .await
            .unwrap();
        store
            .put_vote(PeerVote {
                subject_reader_id: "R1".to_string(),
                voter_reader_id: "R2".to_string(),
                vote: Vote::Approve,
                cast_at: 20,
            })
            .await
            .unwrap();

        let votes = store.votes_for("R1").await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote, Vote::Approve);
    }

    #[tokio::test]
    async fn suspicion_takes_highest_active_multiplier() {
        let store = MemoryHealingStore::new();
        store
            .put_suspicion(TagSuspicion {
                tag_hash: "t1".to_string(),
                source_reader_id: "R1".to_string(),
                multiplier: 1.5,
                expires_at: 1000,
            })
            .await
            .unwrap();
        store
            .put_suspicion(TagSuspicion {
                tag_hash: "t1".to_string(),
                source_reader_id: "R2".to_string(),
                multiplier: 2.0,
                expires_at: 1000,
            })
            .await
            .unwrap();

        assert_eq!(store.suspicion_multiplier("t1", 500).await.unwrap(), 2.0);
        // Expired suspicions no longer raise sensitivity.
        assert_eq!(store.suspicion_multiplier("t1", 2000).await.unwrap(), 1.0);
        assert_eq!(store.remove_expired_suspicions(2000).await.unwrap(), 2);
    }
}
