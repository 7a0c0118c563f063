//! Tollgate Library
//!
//! Toll-event sequencing service: authenticates RFID reader submissions,
//! scores reader trust, fuses fraud signals, and sequences every accepted
//! event into a tamper-evident VDF hash chain anchored to an external ledger.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (readers, events, cards, chain links)
//! - [`infra`] - Store traits, in-memory stores, retry, shutdown
//! - [`crypto`] - Hashing, HMAC signatures, VDF computation
//! - [`policy`] - Declarative trust policy with atomic reload
//! - [`ingest`] - Toll event verification pipeline
//! - [`trust`] - Trust engine, quarantine and self-healing
//! - [`fraud`] - Rule + ML fraud decision fusion
//! - [`chain`] - VDF chain manager and append workers
//! - [`anchor`] - Ledger anchoring queue and drain worker
//! - [`service`] - End-to-end toll processing pipeline
//! - [`admin`] - Protected administrative operations
//! - [`api`] - REST API routes
//! - [`server`] - Process bootstrap and background workers

pub mod admin;
pub mod anchor;
pub mod api;
pub mod chain;
pub mod clock;
pub mod crypto;
pub mod domain;
pub mod fraud;
pub mod infra;
pub mod ingest;
pub mod metrics;
pub mod policy;
pub mod server;
pub mod service;
pub mod sweeper;
pub mod trust;

// Re-export commonly used types
pub use domain::{
    Anchor, AnchorStatus, Card, Decision, DecisionRecord, Hash256, ProbationChallenge,
    QuarantineRecord, Reader, ReaderStatus, RejectCode, TollEvent, VdfLink, VehicleType,
    ViolationClass,
};

pub use infra::{Result, TollError};
pub use policy::{PolicyHandle, TrustPolicy};
pub use service::{ProcessOutcome, TollService};
