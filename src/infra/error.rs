//! Error types for the Tollgate infrastructure.
//!
//! Errors fall into four disjoint classes the API layer maps to responses:
//! auth/authz (never retried), validation, transient infrastructure
//! (degrades gracefully or retries with backoff), and fatal (ingest refuses
//! to serve; admin endpoints stay up for recovery).

use thiserror::Error;
use uuid::Uuid;

use crate::domain::TamperClass;

/// Errors that can occur in the Tollgate infrastructure.
#[derive(Error, Debug)]
pub enum TollError {
    /// Reader not found in the registry
    #[error("reader not found: {0}")]
    ReaderNotFound(String),

    /// Registration collision
    #[error("reader already registered: {0}")]
    ReaderExists(String),

    /// Card not found
    #[error("card not found: {0}")]
    CardNotFound(String),

    /// Tariff not configured for a vehicle type
    #[error("tariff not found: {0}")]
    TariffNotFound(String),

    /// No active quarantine for the reader
    #[error("no active quarantine for reader: {0}")]
    QuarantineNotFound(String),

    /// Probation challenge not found
    #[error("challenge not found: {0}")]
    ChallengeNotFound(Uuid),

    /// Anchor not found
    #[error("anchor not found: {0}")]
    AnchorNotFound(u64),

    /// Chain invariant broken
    #[error("chain broken at seq {seq}: {class:?} - {detail}")]
    ChainBroken {
        seq: u64,
        class: TamperClass,
        detail: String,
    },

    /// Genesis reseed attempted on a non-empty chain
    #[error("chain is not empty")]
    ChainNotEmpty,

    /// Policy load or parse error
    #[error("policy error: {0}")]
    Policy(String),

    /// Authorization error
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid peer-consensus vote
    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// Challenge response rejected
    #[error("invalid challenge response: {0}")]
    InvalidChallenge(String),

    /// Ledger submission failure
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Service refuses ingest (startup verification failed, policy broken)
    #[error("service degraded: {0}")]
    Degraded(String),

    /// Request deadline expired before state was committed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Shutdown in progress
    #[error("shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = TollError::ReaderNotFound("R9".to_string());
        assert!(err.to_string().contains("reader not found"));
        assert!(err.to_string().contains("R9"));

        let err = TollError::ChainBroken {
            seq: 3,
            class: TamperClass::VdfMismatch,
            detail: "output mismatch".to_string(),
        };
        assert!(err.to_string().contains("seq 3"));
        assert!(err.to_string().contains("output mismatch"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TollError>();
    }
}
