//! VDF chain manager.
//!
//! Builds the iterated-hash chain over accepted events and verifies it.
//! Appends are strictly serialized on a single mutex so the head is
//! unambiguous; the chain's total order matches append order, not
//! necessarily event-timestamp order.

pub mod worker;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{compute_vdf, sha256, verify_vdf};
use crate::domain::{ChainReport, Hash256, TamperClass, VdfLink};
use crate::infra::{ChainStore, DecisionStore, Result, TollError};
use crate::policy::PolicyHandle;

pub use worker::{spawn_chain_workers, ChainWorkerHandle};

/// `vdf_input = SHA256(prev_output || event_id || reader_id || timestamp_le)`.
pub fn link_input(
    prev_output: &Hash256,
    event_id: &Uuid,
    reader_id: &str,
    timestamp: i64,
) -> Hash256 {
    let mut preimage = Vec::with_capacity(32 + 16 + reader_id.len() + 8);
    preimage.extend_from_slice(prev_output);
    preimage.extend_from_slice(event_id.as_bytes());
    preimage.extend_from_slice(reader_id.as_bytes());
    preimage.extend_from_slice(&(timestamp as u64).to_le_bytes());
    sha256(&preimage)
}

/// Genesis output for a configured seed.
pub fn genesis_output(seed: &str) -> Hash256 {
    sha256(seed.as_bytes())
}

/// Verify one link's VDF output from its stored checkpoints.
///
/// The sampling granularity is reconstructed from the stored checkpoint
/// count, so links computed under older policies still verify.
pub fn verify_link_vdf(link: &VdfLink) -> bool {
    if link.is_genesis() {
        return link.prev_output == link.vdf_input && link.vdf_input == link.vdf_output;
    }
    let granularity = link.proof_checkpoints.len() as u32;
    if granularity == 0 {
        // No checkpoints survived; fall back to full recomputation.
        return compute_vdf(&link.vdf_input, link.difficulty, 1).output == link.vdf_output;
    }
    verify_vdf(
        &link.vdf_input,
        &link.vdf_output,
        &link.proof_checkpoints,
        link.difficulty,
        granularity,
    )
}

/// Serialized chain builder and verifier.
pub struct VdfChain {
    store: Arc<dyn ChainStore>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    head_lock: Mutex<()>,
}

impl VdfChain {
    pub fn new(
        store: Arc<dyn ChainStore>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            head_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Append a link for an accepted event. Serialized on the head mutex.
    pub async fn append(
        &self,
        event_id: Uuid,
        reader_id: &str,
        timestamp: i64,
    ) -> Result<VdfLink> {
        let _guard = self.head_lock.lock().await;
        let policy = self.policy.load();

        // Idempotent per event: the reconciliation pass and the append
        // workers may both reach the same decision record.
        if let Some(existing) = self.store.get_by_event(event_id).await? {
            return Ok(existing);
        }

        let prev = match self.store.head().await? {
            Some(head) => head,
            None => {
                let genesis = self.make_genesis(&policy.vdf.genesis_seed);
                self.store.append(genesis.clone()).await?;
                genesis
            }
        };

        let vdf_input = link_input(&prev.vdf_output, &event_id, reader_id, timestamp);
        let vdf = compute_vdf(
            &vdf_input,
            policy.vdf.difficulty,
            policy.vdf.checkpoint_granularity,
        );

        let link = VdfLink {
            seq: prev.seq + 1,
            event_id,
            reader_id: reader_id.to_string(),
            timestamp,
            prev_output: prev.vdf_output,
            vdf_input,
            vdf_output: vdf.output,
            proof_checkpoints: vdf.checkpoints,
            difficulty: vdf.difficulty,
            computed_at: self.clock.now_unix(),
        };
        self.store.append(link.clone()).await?;
        Ok(link)
    }

    /// Create the genesis link when the chain is empty.
    ///
    /// Fails with [`TollError::ChainNotEmpty`] otherwise; reseeding an
    /// existing chain would orphan every anchored root.
    pub async fn reseed_genesis(&self, seed: &str) -> Result<VdfLink> {
        let _guard = self.head_lock.lock().await;
        if self.store.count().await? > 0 {
            return Err(TollError::ChainNotEmpty);
        }
        let genesis = self.make_genesis(seed);
        self.store.append(genesis.clone()).await?;
        info!(seq = 0, "VDF genesis created");
        Ok(genesis)
    }

    fn make_genesis(&self, seed: &str) -> VdfLink {
        let output = genesis_output(seed);
        VdfLink {
            seq: 0,
            event_id: Uuid::nil(),
            reader_id: String::new(),
            timestamp: 0,
            prev_output: output,
            vdf_input: output,
            vdf_output: output,
            proof_checkpoints: Vec::new(),
            difficulty: 0,
            computed_at: self.clock.now_unix(),
        }
    }

    /// Verify a single link against its stored predecessor. O(1) ignoring
    /// the checkpoint replay.
    pub async fn verify_link(&self, seq: u64) -> Result<ChainReport> {
        let link = self
            .store
            .get(seq)
            .await?
            .ok_or_else(|| TollError::Internal(format!("no link at seq {seq}")))?;

        if link.is_genesis() {
            return if verify_link_vdf(&link) {
                Ok(ChainReport::ok(1))
            } else {
                Ok(ChainReport::broken(
                    0,
                    0,
                    TamperClass::VdfMismatch,
                    "genesis link is not self-consistent",
                ))
            };
        }

        let prev = self
            .store
            .get(seq - 1)
            .await?
            .ok_or_else(|| TollError::Internal(format!("no link at seq {}", seq - 1)))?;

        if link.prev_output != prev.vdf_output {
            return Ok(ChainReport::broken(
                0,
                seq,
                TamperClass::PrevPointerBroken,
                "prev_output does not match predecessor output",
            ));
        }
        let expected_input = link_input(
            &link.prev_output,
            &link.event_id,
            &link.reader_id,
            link.timestamp,
        );
        if link.vdf_input != expected_input {
            return Ok(ChainReport::broken(
                0,
                seq,
                TamperClass::VdfMismatch,
                "vdf_input does not match event fields",
            ));
        }
        if !verify_link_vdf(&link) {
            return Ok(ChainReport::broken(
                0,
                seq,
                TamperClass::VdfMismatch,
                "vdf_output does not match checkpoint replay",
            ));
        }
        Ok(ChainReport::ok(1))
    }

    /// Full-chain verification, reporting the first broken link and its
    /// tamper class.
    pub async fn verify_chain(&self, decisions: &dyn DecisionStore) -> Result<ChainReport> {
        let count = self.store.count().await?;
        if count == 0 {
            return Ok(ChainReport::ok(0));
        }
        let policy = self.policy.load();
        let head_seq = match self.store.head().await? {
            Some(head) => head.seq,
            None => return Ok(ChainReport::ok(0)),
        };

        let links = self.store.range(0, head_seq).await?;
        let mut verified = 0u64;
        let mut prev: Option<&VdfLink> = None;

        for link in &links {
            if let Some(prev) = prev {
                if link.seq != prev.seq + 1 {
                    return Ok(ChainReport::broken(
                        verified,
                        prev.seq + 1,
                        TamperClass::Deleted,
                        format!("sequence gap: {} follows {}", link.seq, prev.seq),
                    ));
                }
                if link.prev_output != prev.vdf_output {
                    return Ok(ChainReport::broken(
                        verified,
                        link.seq,
                        TamperClass::PrevPointerBroken,
                        "prev_output does not match predecessor output",
                    ));
                }
                if link.timestamp + policy.vdf.reorder_tolerance_secs < prev.timestamp
                    && !prev.is_genesis()
                {
                    return Ok(ChainReport::broken(
                        verified,
                        link.seq,
                        TamperClass::Reordered,
                        "timestamps regress beyond the reorder tolerance",
                    ));
                }
            }

            if link.is_genesis() {
                if !verify_link_vdf(link) {
                    return Ok(ChainReport::broken(
                        verified,
                        0,
                        TamperClass::VdfMismatch,
                        "genesis link is not self-consistent",
                    ));
                }
            } else {
                let expected_input = link_input(
                    &link.prev_output,
                    &link.event_id,
                    &link.reader_id,
                    link.timestamp,
                );
                if link.vdf_input != expected_input {
                    return Ok(ChainReport::broken(
                        verified,
                        link.seq,
                        TamperClass::VdfMismatch,
                        "vdf_input does not match event fields",
                    ));
                }
                if !verify_link_vdf(link) {
                    return Ok(ChainReport::broken(
                        verified,
                        link.seq,
                        TamperClass::VdfMismatch,
                        "vdf_output does not match checkpoint replay",
                    ));
                }
                if !decisions.exists(link.event_id).await? {
                    return Ok(ChainReport::broken(
                        verified,
                        link.seq,
                        TamperClass::Deleted,
                        format!("link references missing decision {}", link.event_id),
                    ));
                }
            }

            verified += 1;
            prev = Some(link);
        }

        // Decisions the chain never sequenced.
        for record in decisions.list_ordered().await? {
            if !self.store.contains_event(record.event_id).await? {
                return Ok(ChainReport::broken(
                    verified,
                    head_seq,
                    TamperClass::Inserted,
                    format!("decision {} is not referenced by any link", record.event_id),
                ));
            }
        }

        Ok(ChainReport::ok(verified))
    }

    /// Append links for decisions that never produced one (asynchronous
    /// append mode). Returns how many links were created.
    pub async fn reconcile(&self, decisions: &dyn DecisionStore) -> Result<u64> {
        let mut repaired = 0u64;
        for record in decisions.list_ordered().await? {
            if !self.store.contains_event(record.event_id).await? {
                warn!(event_id = %record.event_id, "reconciling missing chain link");
                self.append(record.event_id, &record.reader_id, record.timestamp)
                    .await?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{Decision, DecisionRecord, ReaderStatus, TrustSnapshot};
    use crate::infra::{MemoryChainStore, MemoryDecisionStore};
    use crate::policy::TrustPolicy;

    const NOW: i64 = 1_700_000_000;

    fn test_policy() -> TrustPolicy {
        let mut policy = TrustPolicy::default();
        // Keep the delay short in tests.
        policy.vdf.difficulty = 50;
        policy.vdf.checkpoint_granularity = 5;
        policy
    }

    struct Fixture {
        chain: VdfChain,
        store: Arc<MemoryChainStore>,
        decisions: Arc<MemoryDecisionStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryChainStore::new());
        let decisions = Arc::new(MemoryDecisionStore::new());
        let chain = VdfChain::new(
            store.clone(),
            Arc::new(PolicyHandle::fixed(test_policy())),
            Arc::new(ManualClock::new(NOW)),
        );
        Fixture {
            chain,
            store,
            decisions,
        }
    }

    async fn record_decision(f: &Fixture, event_id: Uuid, timestamp: i64) {
        f.decisions
            .append(DecisionRecord {
                event_id,
                reader_id: "R1".to_string(),
                tag_hash: "t".repeat(64),
                timestamp,
                ml_a: None,
                ml_b: None,
                iso_flag: 0,
                rule_flags: vec![],
                trust_snapshot: TrustSnapshot {
                    trust_score: 100,
                    status: ReaderStatus::Active,
                },
                decision: Decision::Allow,
                reason_codes: vec![],
                amount: 50.0,
                decided_at: timestamp,
            })
            .await
            .unwrap();
    }

    async fn append_events(f: &Fixture, n: usize) -> Vec<VdfLink> {
        let mut links = Vec::new();
        for i in 0..n {
            let event_id = Uuid::new_v4();
            let ts = NOW + i as i64;
            record_decision(f, event_id, ts).await;
            links.push(f.chain.append(event_id, "R1", ts).await.unwrap());
        }
        links
    }

    #[tokio::test]
    async fn first_append_creates_genesis() {
        let f = fixture();
        let link = f.chain.append(Uuid::new_v4(), "R1", NOW).await.unwrap();
        assert_eq!(link.seq, 1);
        assert_eq!(
            link.prev_output,
            genesis_output(&test_policy().vdf.genesis_seed)
        );

        let genesis = f.store.get(0).await.unwrap().unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.vdf_output, link.prev_output);
    }

    #[tokio::test]
    async fn links_chain_prev_to_output() {
        let f = fixture();
        let links = append_events(&f, 3).await;
        assert_eq!(links[1].prev_output, links[0].vdf_output);
        assert_eq!(links[2].prev_output, links[1].vdf_output);
        assert_eq!(
            links[2].vdf_input,
            link_input(
                &links[1].vdf_output,
                &links[2].event_id,
                "R1",
                links[2].timestamp
            )
        );
    }

    #[tokio::test]
    async fn intact_chain_verifies() {
        let f = fixture();
        append_events(&f, 5).await;
        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert!(report.valid, "{report:?}");
        assert_eq!(report.links_verified, 6); // genesis + 5
    }

    #[tokio::test]
    async fn flipped_output_detected_as_vdf_mismatch() {
        let f = fixture();
        append_events(&f, 5).await;

        let mut tampered = f.store.get(3).await.unwrap().unwrap();
        tampered.vdf_output[0] ^= 0x01;
        f.store.replace(tampered).await.unwrap();

        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_broken_seq, Some(3));
        assert_eq!(report.class, Some(TamperClass::VdfMismatch));

        // Earlier links still verify individually.
        assert!(f.chain.verify_link(1).await.unwrap().valid);
        assert!(f.chain.verify_link(2).await.unwrap().valid);
    }

    #[tokio::test]
    async fn broken_prev_pointer_detected() {
        let f = fixture();
        append_events(&f, 4).await;

        let mut tampered = f.store.get(2).await.unwrap().unwrap();
        tampered.prev_output[5] ^= 0xff;
        f.store.replace(tampered).await.unwrap();

        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert_eq!(report.class, Some(TamperClass::PrevPointerBroken));
        assert_eq!(report.first_broken_seq, Some(2));
    }

    #[tokio::test]
    async fn swapped_event_fields_detected() {
        let f = fixture();
        append_events(&f, 3).await;

        let mut tampered = f.store.get(2).await.unwrap().unwrap();
        tampered.reader_id = "R2".to_string();
        f.store.replace(tampered).await.unwrap();

        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert_eq!(report.class, Some(TamperClass::VdfMismatch));
        assert_eq!(report.first_broken_seq, Some(2));
    }

    #[tokio::test]
    async fn unlinked_decision_detected_as_inserted() {
        let f = fixture();
        append_events(&f, 2).await;
        // A decision that never went through the chain.
        record_decision(&f, Uuid::new_v4(), NOW + 100).await;

        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert_eq!(report.class, Some(TamperClass::Inserted));
    }

    #[tokio::test]
    async fn reconcile_repairs_missing_links() {
        let f = fixture();
        append_events(&f, 2).await;
        let orphan = Uuid::new_v4();
        record_decision(&f, orphan, NOW + 100).await;

        let repaired = f.chain.reconcile(f.decisions.as_ref()).await.unwrap();
        assert_eq!(repaired, 1);
        assert!(f.store.contains_event(orphan).await.unwrap());

        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert!(report.valid);
    }

    #[tokio::test]
    async fn reseed_requires_empty_chain() {
        let f = fixture();
        let genesis = f.chain.reseed_genesis("fresh-seed").await.unwrap();
        assert_eq!(genesis.vdf_output, genesis_output("fresh-seed"));

        let err = f.chain.reseed_genesis("again").await.unwrap_err();
        assert!(matches!(err, TollError::ChainNotEmpty));
    }

    #[tokio::test]
    async fn difficulty_one_links_verify() {
        let store = Arc::new(MemoryChainStore::new());
        let decisions = Arc::new(MemoryDecisionStore::new());
        let mut policy = test_policy();
        policy.vdf.difficulty = 1;
        let chain = VdfChain::new(
            store,
            Arc::new(PolicyHandle::fixed(policy)),
            Arc::new(ManualClock::new(NOW)),
        );
        let f = Fixture {
            chain,
            store: Arc::new(MemoryChainStore::new()),
            decisions,
        };
        let event_id = Uuid::new_v4();
        record_decision(&f, event_id, NOW).await;
        f.chain.append(event_id, "R1", NOW).await.unwrap();
        let report = f.chain.verify_chain(f.decisions.as_ref()).await.unwrap();
        assert!(report.valid);
    }
}
