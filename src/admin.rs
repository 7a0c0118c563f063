//! Protected administrative operations.
//!
//! Every operation is authenticated by a shared admin key compared in
//! constant time. These are the recovery levers for fatal conditions: they
//! stay available even when ingest refuses to serve.

use std::sync::Arc;

use tracing::info;

use crate::anchor::AnchorQueue;
use crate::chain::VdfChain;
use crate::clock::Clock;
use crate::crypto::{constant_time_eq_str, generate_secret};
use crate::domain::{Anchor, Reader, TrustSnapshot, VdfLink};
use crate::infra::{NonceLedger, ReaderStore, Result, TollError};
use crate::policy::PolicyHandle;
use crate::trust::TrustEngine;

/// Admin operations over the registry, chain and anchor queue.
pub struct AdminService {
    readers: Arc<dyn ReaderStore>,
    nonces: Arc<dyn NonceLedger>,
    trust: Arc<TrustEngine>,
    chain: Arc<VdfChain>,
    anchors: Arc<AnchorQueue>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    admin_key: String,
}

impl AdminService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        readers: Arc<dyn ReaderStore>,
        nonces: Arc<dyn NonceLedger>,
        trust: Arc<TrustEngine>,
        chain: Arc<VdfChain>,
        anchors: Arc<AnchorQueue>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
        admin_key: String,
    ) -> Self {
        Self {
            readers,
            nonces,
            trust,
            chain,
            anchors,
            policy,
            clock,
            admin_key,
        }
    }

    /// Constant-time admin key check.
    pub fn authorize(&self, supplied: &str) -> Result<()> {
        if self.admin_key.is_empty() {
            return Err(TollError::Unauthorized(
                "admin key is not configured".to_string(),
            ));
        }
        if constant_time_eq_str(&self.admin_key, supplied) {
            Ok(())
        } else {
            Err(TollError::Unauthorized("invalid admin key".to_string()))
        }
    }

    /// Register a new reader. Returns the record and the plaintext secret
    /// (hex); the secret is only ever returned here.
    pub async fn register_reader(
        &self,
        reader_id: &str,
        secret: Option<String>,
    ) -> Result<(Reader, String)> {
        if self.readers.get(reader_id).await?.is_some() {
            return Err(TollError::ReaderExists(reader_id.to_string()));
        }
        let secret_bytes = match secret {
            Some(s) if !s.is_empty() => s.into_bytes(),
            _ => generate_secret(),
        };
        let secret_hex = hex::encode(&secret_bytes);
        let reader = Reader::new(reader_id, secret_bytes, self.clock.now_unix());
        self.readers.put(reader.clone()).await?;
        info!(reader_id, "reader registered");
        Ok((reader, secret_hex))
    }

    /// Rotate a reader's secret; earlier-key signatures become invalid.
    pub async fn rotate_reader_secret(&self, reader_id: &str) -> Result<(u32, String)> {
        let mut reader = self
            .readers
            .get(reader_id)
            .await?
            .ok_or_else(|| TollError::ReaderNotFound(reader_id.to_string()))?;
        let secret = generate_secret();
        let secret_hex = hex::encode(&secret);
        reader.secret = secret;
        reader.key_version += 1;
        let version = reader.key_version;
        self.readers.put(reader).await?;
        info!(reader_id, key_version = version, "reader secret rotated");
        Ok((version, secret_hex))
    }

    pub async fn reset_trust(&self, reader_id: &str, score: i32) -> Result<TrustSnapshot> {
        self.trust.reset_trust(reader_id, score).await
    }

    pub async fn force_quarantine(&self, reader_id: &str, reason: &str) -> Result<TrustSnapshot> {
        self.trust.force_quarantine(reader_id, reason).await
    }

    /// Drop nonce records observed before the cutoff.
    pub async fn clear_nonces(&self, before: i64) -> Result<usize> {
        let removed = self.nonces.remove_observed_before(before).await?;
        info!(before, removed, "nonce ledger cleared");
        Ok(removed)
    }

    /// Reseed the VDF genesis; only valid while the chain is empty.
    pub async fn reseed_vdf_genesis(&self, seed: &str) -> Result<VdfLink> {
        self.chain.reseed_genesis(seed).await
    }

    pub async fn list_pending_anchors(&self) -> Result<Vec<Anchor>> {
        self.anchors.pending().await
    }

    pub async fn retry_anchor(&self, anchor_id: u64) -> Result<Anchor> {
        self.anchors.retry(anchor_id).await
    }

    /// Re-read the policy file and swap the active snapshot.
    pub fn reload_policy(&self) -> Result<()> {
        self.policy.reload()?;
        info!("trust policy reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{AnchorQueue, NullLedger};
    use crate::clock::ManualClock;
    use crate::infra::{
        MemoryAnchorStore, MemoryChainStore, MemoryDecisionStore, MemoryHealingStore,
        MemoryNonceLedger, MemoryReaderStore, MemoryViolationLog,
    };
    use crate::metrics::Metrics;
    use crate::policy::TrustPolicy;

    const NOW: i64 = 1_700_000_000;

    fn admin() -> AdminService {
        let readers = Arc::new(MemoryReaderStore::new());
        let nonces = Arc::new(MemoryNonceLedger::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let policy = Arc::new(PolicyHandle::fixed(TrustPolicy::default()));
        let chain_store = Arc::new(MemoryChainStore::new());
        let chain = Arc::new(VdfChain::new(
            chain_store.clone(),
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let anchors = Arc::new(AnchorQueue::new(
            Arc::new(MemoryAnchorStore::new()),
            chain_store,
            Arc::new(NullLedger),
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
            Arc::new(Metrics::new()),
        ));
        let trust = Arc::new(TrustEngine::new(
            readers.clone(),
            Arc::new(MemoryHealingStore::new()),
            Arc::new(MemoryDecisionStore::new()),
            Arc::new(MemoryViolationLog::new()),
            policy.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        AdminService::new(
            readers,
            nonces,
            trust,
            chain,
            anchors,
            policy,
            clock,
            "super-secret-admin-key".to_string(),
        )
    }

    #[tokio::test]
    async fn authorize_constant_time() {
        let admin = admin();
        assert!(admin.authorize("super-secret-admin-key").is_ok());
        assert!(admin.authorize("wrong").is_err());
        assert!(admin.authorize("").is_err());
    }

    #[tokio::test]
    async fn register_then_rotate() {
        let admin = admin();
        let (reader, secret_hex) = admin.register_reader("R1", None).await.unwrap();
        assert_eq!(reader.key_version, 1);
        assert_eq!(reader.trust_score, 100);
        assert!(!secret_hex.is_empty());

        // Duplicate registration is rejected.
        assert!(matches!(
            admin.register_reader("R1", None).await.unwrap_err(),
            TollError::ReaderExists(_)
        ));

        let (version, new_secret) = admin.rotate_reader_secret("R1").await.unwrap();
        assert_eq!(version, 2);
        assert_ne!(new_secret, secret_hex);
    }

    #[tokio::test]
    async fn rotate_unknown_reader_fails() {
        let admin = admin();
        assert!(matches!(
            admin.rotate_reader_secret("nope").await.unwrap_err(),
            TollError::ReaderNotFound(_)
        ));
    }

    #[tokio::test]
    async fn reseed_only_on_empty_chain() {
        let admin = admin();
        admin.reseed_vdf_genesis("seed-1").await.unwrap();
        assert!(matches!(
            admin.reseed_vdf_genesis("seed-2").await.unwrap_err(),
            TollError::ChainNotEmpty
        ));
    }

    #[tokio::test]
    async fn explicit_secret_is_used() {
        let admin = admin();
        let (_, secret_hex) = admin
            .register_reader("R2", Some("reader_secret_02".to_string()))
            .await
            .unwrap();
        assert_eq!(secret_hex, hex::encode(b"reader_secret_02"));
    }
}
