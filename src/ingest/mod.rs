//! Ingest verification pipeline.
//!
//! Authenticates one inbound toll event against the reader registry, the
//! nonce ledger and the policy. Checks run in a fixed order and each failure
//! terminates verification; failures are observable-side-effect-free except
//! for the rate-limiter token decrement (and the trust penalty the caller
//! applies). The nonce commits only on full acceptance.

pub mod rate_limit;

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::crypto::{constant_time_eq_str, hmac_sha256_hex, signature_message};
use crate::domain::{Reader, RejectCode, TollEvent};
use crate::infra::{NonceLedger, ReaderStore, Result};
use crate::policy::PolicyHandle;

pub use rate_limit::RateLimiter;

/// Result of verifying one inbound event.
#[derive(Debug)]
pub enum VerifyOutcome {
    Accepted {
        /// Registry state at acceptance time.
        reader: Reader,
    },
    Rejected {
        code: RejectCode,
        /// Present when the reader was identified before the failing check,
        /// so the trust engine can penalize it.
        reader: Option<Reader>,
    },
}

/// Orchestrates crypto, nonce, drift, rate and status checks.
pub struct IngestVerifier {
    readers: Arc<dyn ReaderStore>,
    nonces: Arc<dyn NonceLedger>,
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiter,
}

impl IngestVerifier {
    pub fn new(
        readers: Arc<dyn ReaderStore>,
        nonces: Arc<dyn NonceLedger>,
        policy: Arc<PolicyHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            readers,
            nonces,
            policy,
            clock,
            rate_limiter: RateLimiter::new(),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Verify one event. Caller must hold the per-reader lock.
    pub async fn verify(&self, event: &TollEvent) -> Result<VerifyOutcome> {
        let policy = self.policy.load();
        let started = self.clock.monotonic();

        // 1. Reader lookup.
        let reader = match self.readers.get(&event.reader_id).await? {
            Some(reader) => reader,
            None => {
                debug!(reader_id = %event.reader_id, "unknown reader");
                return Ok(VerifyOutcome::Rejected {
                    code: RejectCode::UnknownReader,
                    reader: None,
                });
            }
        };

        let reject = |code: RejectCode, reader: Reader| {
            debug!(reader_id = %reader.reader_id, %code, "event rejected");
            Ok(VerifyOutcome::Rejected {
                code,
                reader: Some(reader),
            })
        };

        // 2. Key version: events signed under a superseded key are invalid.
        if event.key_version < reader.key_version {
            return reject(RejectCode::BadKeyVersion, reader);
        }

        // 3. HMAC signature over the canonical message.
        let message = signature_message(
            &event.tag_hash,
            &event.reader_id,
            event.timestamp,
            &event.nonce,
        );
        let expected = hmac_sha256_hex(&reader.secret, message.as_bytes());
        if !constant_time_eq_str(&expected, &event.signature.to_ascii_lowercase()) {
            return reject(RejectCode::BadSignature, reader);
        }

        // 4. Timestamp freshness: exactly max_drift old is still accepted.
        let now = self.clock.now_unix();
        if (now - event.timestamp).abs() > policy.ingest.max_drift_secs {
            return reject(RejectCode::StaleTimestamp, reader);
        }

        // 5. Replay.
        if self.nonces.contains(&event.reader_id, &event.nonce).await? {
            return reject(RejectCode::Replay, reader);
        }

        // 6. Per-reader rate limit. The token decrement persists on later
        //    failures.
        if !self.rate_limiter.try_acquire(
            &event.reader_id,
            policy.ingest.rate_per_minute,
            policy.ingest.rate_burst,
        ) {
            return reject(RejectCode::RateLimited, reader);
        }

        // 7. Enforcement status gate.
        if reader.status.blocks_ingest() {
            return reject(RejectCode::ReaderSuspended, reader);
        }

        // Outer deadline: abort before the nonce commit so an expired
        // request leaves no partial state.
        let deadline = std::time::Duration::from_millis(policy.ingest.request_deadline_ms);
        if started.elapsed() > deadline {
            return Err(crate::infra::TollError::DeadlineExceeded(
                "ingest verification exceeded its deadline".to_string(),
            ));
        }

        // 8. Commit the nonce. The per-reader lock makes the re-check
        //    redundant in practice; a lost race still reports a replay
        //    rather than double-accepting.
        if !self
            .nonces
            .insert_if_absent(&event.reader_id, &event.nonce, now)
            .await?
        {
            return reject(RejectCode::Replay, reader);
        }

        Ok(VerifyOutcome::Accepted { reader })
    }
}
