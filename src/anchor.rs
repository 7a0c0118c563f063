//! Ledger anchoring queue.
//!
//! Accumulates VDF links into batches, commits a Merkle root per batch and
//! submits it to the external ledger with retry and full-jitter backoff.
//! Submission is idempotent at the ledger via `client_reference = root
//! hash`, so retrying a batch is always safe. Backpressure is bounded: a
//! deep pending queue raises a warning counter but never blocks or drops
//! ingest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rs_merkle::{algorithms::Sha256 as MerkleSha256, MerkleTree};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::crypto::sha256;
use crate::domain::{Anchor, AnchorStatus, Hash256};
use crate::infra::{AnchorStore, BackoffConfig, ChainStore, Result, ShutdownSignal, TollError};
use crate::metrics::Metrics;
use crate::policy::{LedgerVariant, PolicyHandle};

/// One ledger submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPayload {
    /// Idempotency reference: hex of the batch Merkle root.
    pub client_reference: String,
    pub seq_from: u64,
    pub seq_to: u64,
    pub root_hash: String,
    pub link_count: u64,
}

/// Receipt returned by the ledger on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub reference: String,
}

/// Submission failures, split by retryability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Worth retrying with backoff.
    #[error("transient ledger failure: {0}")]
    Transient(String),
    /// Schema rejection or similar; surfaced via the admin API.
    #[error("permanent ledger failure: {0}")]
    Permanent(String),
}

/// Best-effort idempotent ledger collaborator.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, payload: &AnchorPayload)
        -> std::result::Result<LedgerReceipt, LedgerError>;
}

/// Accepts everything locally; for deployments without a ledger.
pub struct NullLedger;

#[async_trait]
impl LedgerClient for NullLedger {
    async fn submit(
        &self,
        payload: &AnchorPayload,
    ) -> std::result::Result<LedgerReceipt, LedgerError> {
        Ok(LedgerReceipt {
            reference: format!("local-{}", payload.client_reference),
        })
    }
}

/// Scriptable ledger for tests: pops queued outcomes, then succeeds.
#[derive(Default)]
pub struct MockLedger {
    outcomes: std::sync::Mutex<std::collections::VecDeque<std::result::Result<LedgerReceipt, LedgerError>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: std::result::Result<LedgerReceipt, LedgerError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(
        &self,
        payload: &AnchorPayload,
    ) -> std::result::Result<LedgerReceipt, LedgerError> {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(LedgerReceipt {
                    reference: format!("mock-{}", payload.client_reference),
                })
            })
    }
}

/// JSON-over-HTTP submission to a ledger relay.
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: String,
    deadline: Duration,
}

impl HttpLedger {
    pub fn new(endpoint: String, deadline: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            deadline,
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn submit(
        &self,
        payload: &AnchorPayload,
    ) -> std::result::Result<LedgerReceipt, LedgerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.deadline)
            .json(payload)
            .send()
            .await
            .map_err(|e| LedgerError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let receipt = response
                .json::<LedgerReceipt>()
                .await
                .unwrap_or(LedgerReceipt {
                    reference: payload.client_reference.clone(),
                });
            Ok(receipt)
        } else if status.is_client_error() {
            Err(LedgerError::Permanent(format!(
                "ledger rejected anchor: {status}"
            )))
        } else {
            Err(LedgerError::Transient(format!("ledger error: {status}")))
        }
    }
}

/// Build the ledger client selected by policy.
pub fn ledger_for(
    variant: LedgerVariant,
    endpoint: &str,
    deadline_ms: u64,
) -> Arc<dyn LedgerClient> {
    match variant {
        LedgerVariant::Http => Arc::new(HttpLedger::new(
            endpoint.to_string(),
            Duration::from_millis(deadline_ms),
        )),
        LedgerVariant::Mock => Arc::new(MockLedger::new()),
        LedgerVariant::Null => Arc::new(NullLedger),
    }
}

/// Merkle root over a batch's `(seq, vdf_output)` pairs.
pub fn batch_root(leaves: &[(u64, Hash256)]) -> Hash256 {
    let hashed: Vec<[u8; 32]> = leaves
        .iter()
        .map(|(seq, output)| {
            let mut preimage = Vec::with_capacity(8 + 32);
            preimage.extend_from_slice(&seq.to_be_bytes());
            preimage.extend_from_slice(output);
            sha256(&preimage)
        })
        .collect();
    MerkleTree::<MerkleSha256>::from_leaves(&hashed)
        .root()
        .unwrap_or([0u8; 32])
}

/// Batches links and drains pending anchors to the ledger.
pub struct AnchorQueue {
    anchors: Arc<dyn AnchorStore>,
    chain: Arc<dyn ChainStore>,
    ledger: Arc<dyn LedgerClient>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    /// Serializes batch creation so ranges never overlap.
    batch_lock: Mutex<()>,
}

impl AnchorQueue {
    pub fn new(
        anchors: Arc<dyn AnchorStore>,
        chain: Arc<dyn ChainStore>,
        ledger: Arc<dyn LedgerClient>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            anchors,
            chain,
            ledger,
            policy,
            clock,
            metrics,
            batch_lock: Mutex::new(()),
        }
    }

    /// Create anchors for unanchored links, by batch size or age.
    pub async fn maybe_batch(&self) -> Result<usize> {
        let _guard = self.batch_lock.lock().await;
        let policy = self.policy.load();
        let now = self.clock.now_unix();

        let head_seq = match self.chain.head().await? {
            Some(head) if head.seq > 0 => head.seq,
            _ => return Ok(0),
        };
        // Genesis (seq 0) is never anchored; it is pinned by the seed.
        let mut next_from = self.anchors.max_anchored_seq().await?.unwrap_or(0) + 1;
        let mut created = 0;

        while next_from <= head_seq {
            let unanchored = head_seq - next_from + 1;
            let batch_to = if unanchored >= policy.anchor.batch_size {
                next_from + policy.anchor.batch_size - 1
            } else {
                // Partial batch once the oldest pending link is old enough.
                let oldest = self
                    .chain
                    .get(next_from)
                    .await?
                    .map(|l| l.computed_at)
                    .unwrap_or(now);
                if now - oldest < policy.anchor.max_delay_secs {
                    break;
                }
                head_seq
            };

            self.create_anchor(next_from, batch_to, now).await?;
            created += 1;
            next_from = batch_to + 1;
        }

        Ok(created)
    }

    async fn create_anchor(&self, seq_from: u64, seq_to: u64, now: i64) -> Result<()> {
        let links = self.chain.range(seq_from, seq_to).await?;
        if links.is_empty() {
            return Err(TollError::Internal(format!(
                "no links in anchor range {seq_from}..={seq_to}"
            )));
        }
        let leaves: Vec<(u64, Hash256)> =
            links.iter().map(|l| (l.seq, l.vdf_output)).collect();
        let root_hash = batch_root(&leaves);

        let anchor = Anchor {
            anchor_id: self.anchors.next_id().await?,
            seq_from,
            seq_to,
            root_hash,
            ledger_receipt: None,
            status: AnchorStatus::Pending,
            attempts: 0,
            last_attempt: None,
            next_attempt_at: now,
            created_at: now,
        };
        info!(
            anchor_id = anchor.anchor_id,
            seq_from, seq_to, "anchor batch created"
        );
        self.anchors.put(anchor).await?;
        Ok(())
    }

    /// Submit every due pending anchor once.
    pub async fn drain_once(&self) -> Result<()> {
        let policy = self.policy.load();
        let now = self.clock.now_unix();
        let backoff = BackoffConfig::new(
            Duration::from_millis(policy.anchor.backoff_base_ms),
            Duration::from_millis(policy.anchor.backoff_cap_ms),
        );

        let pending = self.anchors.pending().await?;
        if pending.len() > policy.anchor.queue_max {
            // The chain keeps appending regardless; this is observability,
            // not flow control.
            warn!(
                depth = pending.len(),
                max = policy.anchor.queue_max,
                "anchor queue depth exceeds configured maximum"
            );
            Metrics::incr(&self.metrics.anchor_backlog_warnings);
        }

        for mut anchor in pending {
            if anchor.next_attempt_at > now {
                continue;
            }

            let payload = AnchorPayload {
                client_reference: hex::encode(anchor.root_hash),
                seq_from: anchor.seq_from,
                seq_to: anchor.seq_to,
                root_hash: hex::encode(anchor.root_hash),
                link_count: anchor.seq_to - anchor.seq_from + 1,
            };

            anchor.attempts += 1;
            anchor.last_attempt = Some(now);

            match self.ledger.submit(&payload).await {
                Ok(receipt) => {
                    info!(
                        anchor_id = anchor.anchor_id,
                        receipt = %receipt.reference,
                        "anchor submitted"
                    );
                    anchor.status = AnchorStatus::Sent;
                    anchor.ledger_receipt = Some(receipt.reference);
                    Metrics::incr(&self.metrics.anchors_sent);
                }
                Err(LedgerError::Transient(reason)) => {
                    let delay = backoff.delay_for_attempt(anchor.attempts.saturating_sub(1));
                    anchor.next_attempt_at = now + delay.as_secs().max(1) as i64;
                    warn!(
                        anchor_id = anchor.anchor_id,
                        attempts = anchor.attempts,
                        retry_in_secs = anchor.next_attempt_at - now,
                        reason,
                        "anchor submission failed, will retry"
                    );
                }
                Err(LedgerError::Permanent(reason)) => {
                    warn!(
                        anchor_id = anchor.anchor_id,
                        reason, "anchor submission permanently failed"
                    );
                    anchor.status = AnchorStatus::Failed;
                    Metrics::incr(&self.metrics.anchors_failed);
                }
            }

            self.anchors.put(anchor).await?;
        }

        Ok(())
    }

    /// Admin retry of a failed (or stuck) anchor.
    pub async fn retry(&self, anchor_id: u64) -> Result<Anchor> {
        let mut anchor = self
            .anchors
            .get(anchor_id)
            .await?
            .ok_or(TollError::AnchorNotFound(anchor_id))?;
        anchor.status = AnchorStatus::Pending;
        anchor.next_attempt_at = self.clock.now_unix();
        self.anchors.put(anchor.clone()).await?;
        Ok(anchor)
    }

    pub async fn pending(&self) -> Result<Vec<Anchor>> {
        self.anchors.pending().await
    }

    pub async fn list(&self) -> Result<Vec<Anchor>> {
        self.anchors.list().await
    }
}

/// Single background worker: batch then drain, until shutdown.
pub fn spawn_anchor_worker(
    queue: Arc<AnchorQueue>,
    signal: ShutdownSignal,
    tick: Duration,
) -> tokio::task::JoinHandle<()> {
    crate::infra::spawn_until_shutdown(signal, async move {
        info!("anchor worker started");
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = queue.maybe_batch().await {
                warn!(%err, "anchor batching failed");
            }
            if let Err(err) = queue.drain_once().await {
                warn!(%err, "anchor drain failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::VdfLink;
    use crate::infra::{MemoryAnchorStore, MemoryChainStore};
    use crate::policy::TrustPolicy;
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        queue: AnchorQueue,
        anchors: Arc<MemoryAnchorStore>,
        chain: Arc<MemoryChainStore>,
        ledger: Arc<MockLedger>,
        clock: Arc<ManualClock>,
        metrics: Arc<Metrics>,
    }

    fn fixture(policy: TrustPolicy) -> Fixture {
        let anchors = Arc::new(MemoryAnchorStore::new());
        let chain = Arc::new(MemoryChainStore::new());
        let ledger = Arc::new(MockLedger::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let metrics = Arc::new(Metrics::new());
        let queue = AnchorQueue::new(
            anchors.clone(),
            chain.clone(),
            ledger.clone(),
            Arc::new(PolicyHandle::fixed(policy)),
            clock.clone() as Arc<dyn Clock>,
            metrics.clone(),
        );
        Fixture {
            queue,
            anchors,
            chain,
            ledger,
            clock,
            metrics,
        }
    }

    async fn seed_links(chain: &MemoryChainStore, count: u64, computed_at: i64) {
        for seq in 0..=count {
            chain
                .append(VdfLink {
                    seq,
                    event_id: if seq == 0 { Uuid::nil() } else { Uuid::new_v4() },
                    reader_id: "R1".to_string(),
                    timestamp: computed_at + seq as i64,
                    prev_output: [seq as u8; 32],
                    vdf_input: [seq as u8; 32],
                    vdf_output: [seq as u8 + 1; 32],
                    proof_checkpoints: vec![],
                    difficulty: 1,
                    computed_at,
                })
                .await
                .unwrap();
        }
    }

    #[test]
    fn batch_root_is_order_sensitive() {
        let a = batch_root(&[(1, [1u8; 32]), (2, [2u8; 32])]);
        let b = batch_root(&[(2, [2u8; 32]), (1, [1u8; 32])]);
        assert_ne!(a, b);
        // Deterministic.
        assert_eq!(a, batch_root(&[(1, [1u8; 32]), (2, [2u8; 32])]));
    }

    #[tokio::test]
    async fn batches_by_size() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 10;
        let f = fixture(policy);
        seed_links(&f.chain, 25, NOW).await;

        let created = f.queue.maybe_batch().await.unwrap();
        assert_eq!(created, 2);

        let anchors = f.anchors.list().await.unwrap();
        assert_eq!(anchors[0].seq_from, 1);
        assert_eq!(anchors[0].seq_to, 10);
        assert_eq!(anchors[1].seq_from, 11);
        assert_eq!(anchors[1].seq_to, 20);
        // The trailing 5 links wait for more traffic or the age trigger.
    }

    #[tokio::test]
    async fn batches_partial_after_max_delay() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 10;
        policy.anchor.max_delay_secs = 30;
        let f = fixture(policy);
        seed_links(&f.chain, 3, NOW).await;

        assert_eq!(f.queue.maybe_batch().await.unwrap(), 0);

        f.clock.advance(31);
        assert_eq!(f.queue.maybe_batch().await.unwrap(), 1);
        let anchors = f.anchors.list().await.unwrap();
        assert_eq!(anchors[0].seq_from, 1);
        assert_eq!(anchors[0].seq_to, 3);
    }

    #[tokio::test]
    async fn drain_success_marks_sent_with_receipt() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 3;
        let f = fixture(policy);
        seed_links(&f.chain, 3, NOW).await;
        f.queue.maybe_batch().await.unwrap();

        f.queue.drain_once().await.unwrap();
        let anchor = &f.anchors.list().await.unwrap()[0];
        assert_eq!(anchor.status, AnchorStatus::Sent);
        assert!(anchor.ledger_receipt.as_deref().unwrap().starts_with("mock-"));
        assert_eq!(f.metrics.snapshot().anchors_sent, 1);
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_succeeds() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 3;
        let f = fixture(policy);
        seed_links(&f.chain, 3, NOW).await;
        f.queue.maybe_batch().await.unwrap();

        f.ledger
            .push_outcome(Err(LedgerError::Transient("rpc down".to_string())));

        f.queue.drain_once().await.unwrap();
        let anchor = f.anchors.list().await.unwrap()[0].clone();
        assert_eq!(anchor.status, AnchorStatus::Pending);
        assert_eq!(anchor.attempts, 1);
        assert!(anchor.next_attempt_at > NOW);

        // Not due yet: draining again does nothing.
        f.queue.drain_once().await.unwrap();
        assert_eq!(f.anchors.list().await.unwrap()[0].attempts, 1);

        // Past the backoff window the retry succeeds.
        f.clock.advance(600);
        f.queue.drain_once().await.unwrap();
        let anchor = &f.anchors.list().await.unwrap()[0];
        assert_eq!(anchor.status, AnchorStatus::Sent);
        assert_eq!(anchor.attempts, 2);
    }

    #[tokio::test]
    async fn permanent_failure_marks_failed_and_retry_requeues() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 3;
        let f = fixture(policy);
        seed_links(&f.chain, 3, NOW).await;
        f.queue.maybe_batch().await.unwrap();

        f.ledger
            .push_outcome(Err(LedgerError::Permanent("schema rejected".to_string())));
        f.queue.drain_once().await.unwrap();

        let anchor = f.anchors.list().await.unwrap()[0].clone();
        assert_eq!(anchor.status, AnchorStatus::Failed);
        assert_eq!(f.metrics.snapshot().anchors_failed, 1);

        // Admin retry re-queues it; next drain succeeds.
        f.queue.retry(anchor.anchor_id).await.unwrap();
        f.queue.drain_once().await.unwrap();
        assert_eq!(
            f.anchors.list().await.unwrap()[0].status,
            AnchorStatus::Sent
        );
    }

    #[tokio::test]
    async fn deep_queue_raises_warning_counter() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 1;
        policy.anchor.queue_max = 2;
        let f = fixture(policy);
        seed_links(&f.chain, 5, NOW).await;
        f.queue.maybe_batch().await.unwrap();

        // 5 pending anchors > queue_max = 2. Make them all undue so they
        // stay pending through the depth check.
        for mut anchor in f.anchors.list().await.unwrap() {
            anchor.next_attempt_at = NOW + 1_000;
            f.anchors.put(anchor).await.unwrap();
        }
        f.queue.drain_once().await.unwrap();
        assert!(f.metrics.snapshot().anchor_backlog_warnings >= 1);
    }

    #[tokio::test]
    async fn idempotent_reference_is_root_hash() {
        let mut policy = TrustPolicy::default();
        policy.anchor.batch_size = 2;
        let f = fixture(policy);
        seed_links(&f.chain, 2, NOW).await;
        f.queue.maybe_batch().await.unwrap();
        let anchor = &f.anchors.list().await.unwrap()[0];
        // client_reference equals the hex root; retries reuse it.
        assert_eq!(hex::encode(anchor.root_hash).len(), 64);
    }
}
