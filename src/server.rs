//! Server bootstrap for Tollgate.
//!
//! Wires together: configuration, the policy handle, the in-memory stores,
//! the core services (verifier, trust, fraud, chain, anchors), background
//! workers and the axum router. Startup runs a full-chain verification; a
//! broken chain or unreadable policy puts the process in degraded mode
//! where ingest returns 503 but admin endpoints stay up for recovery.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::admin::AdminService;
use crate::anchor::{ledger_for, spawn_anchor_worker, AnchorQueue};
use crate::api;
use crate::chain::{spawn_chain_workers, VdfChain};
use crate::clock::{Clock, SystemClock};
use crate::fraud::{scorer_for, FraudDetector, StatsHandle};
use crate::infra::{
    shutdown_signal, CardStore, DecisionStore, HealingStore, MemoryAnchorStore, MemoryCardStore,
    MemoryChainStore, MemoryDecisionStore, MemoryHealingStore, MemoryNonceLedger,
    MemoryReaderStore, MemoryViolationLog, NonceLedger, ReaderStore, ShutdownCoordinator,
    ViolationLog,
};
use crate::ingest::IngestVerifier;
use crate::metrics::Metrics;
use crate::policy::{PolicyHandle, TrustPolicy};
use crate::service::TollService;
use crate::sweeper::Sweeper;
use crate::trust::{HealingEngine, TrustEngine};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address.
    pub listen_addr: SocketAddr,
    /// Shared admin API key (`X-API-Key`).
    pub admin_key: String,
    /// Path to the trust policy JSON; defaults apply when unset.
    pub policy_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid listen address");

        Self {
            listen_addr,
            admin_key: std::env::var("ADMIN_API_KEY").unwrap_or_default(),
            policy_path: std::env::var("TRUST_POLICY_PATH").ok(),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TollService>,
    pub admin: Arc<AdminService>,
    pub healing: Arc<HealingEngine>,
    pub chain: Arc<VdfChain>,
    pub anchors: Arc<AnchorQueue>,
    pub readers: Arc<dyn ReaderStore>,
    pub nonces: Arc<dyn NonceLedger>,
    pub cards: Arc<dyn CardStore>,
    pub decisions: Arc<dyn DecisionStore>,
    pub healing_store: Arc<dyn HealingStore>,
    pub violations: Arc<dyn ViolationLog>,
    pub policy: Arc<PolicyHandle>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    degraded: Arc<AtomicBool>,
}

impl AppState {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }
}

/// Everything `build_state` wires up, including worker handles the caller
/// may want to join or inspect.
pub struct App {
    pub state: AppState,
    pub sweeper: Arc<Sweeper>,
    pub coordinator: Arc<ShutdownCoordinator>,
}

/// Assemble services, stores and workers over the given policy handle.
pub fn build_state(
    policy: Arc<PolicyHandle>,
    clock: Arc<dyn Clock>,
    admin_key: String,
) -> App {
    let snapshot = policy.load();

    let readers: Arc<dyn ReaderStore> = Arc::new(MemoryReaderStore::new());
    let nonces: Arc<dyn NonceLedger> = Arc::new(MemoryNonceLedger::new());
    let cards: Arc<dyn CardStore> = Arc::new(MemoryCardStore::new());
    let decisions: Arc<dyn DecisionStore> = Arc::new(MemoryDecisionStore::new());
    let healing_store: Arc<dyn HealingStore> = Arc::new(MemoryHealingStore::new());
    let violations: Arc<dyn ViolationLog> = Arc::new(MemoryViolationLog::new());
    let chain_store = Arc::new(MemoryChainStore::new());
    let anchor_store = Arc::new(MemoryAnchorStore::new());

    let metrics = Arc::new(Metrics::new());
    let stats = Arc::new(StatsHandle::new());
    let coordinator = Arc::new(ShutdownCoordinator::new());

    let trust = Arc::new(TrustEngine::new(
        readers.clone(),
        healing_store.clone(),
        decisions.clone(),
        violations.clone(),
        policy.clone(),
        clock.clone(),
    ));
    let healing = Arc::new(HealingEngine::new(
        readers.clone(),
        healing_store.clone(),
        cards.clone(),
        violations.clone(),
        policy.clone(),
        clock.clone(),
    ));
    let chain = Arc::new(VdfChain::new(
        chain_store.clone(),
        policy.clone(),
        clock.clone(),
    ));
    let ledger = ledger_for(
        snapshot.anchor.ledger,
        &snapshot.anchor.ledger_endpoint,
        snapshot.anchor.ledger_deadline_ms,
    );
    let anchors = Arc::new(AnchorQueue::new(
        anchor_store,
        chain_store,
        ledger,
        policy.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    let chain_workers = spawn_chain_workers(
        chain.clone(),
        metrics.clone(),
        snapshot.vdf.workers,
        snapshot.vdf.queue_capacity,
        coordinator.signal(),
    );

    let verifier = IngestVerifier::new(
        readers.clone(),
        nonces.clone(),
        policy.clone(),
        clock.clone(),
    );
    let fraud = FraudDetector::new(
        scorer_for(snapshot.fraud.scorer, snapshot.fraud.mock_score),
        stats.clone(),
        policy.clone(),
        clock.clone(),
    );
    let service = Arc::new(TollService::new(
        verifier,
        trust.clone(),
        fraud,
        cards.clone(),
        decisions.clone(),
        healing_store.clone(),
        chain_workers,
        policy.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let admin = Arc::new(AdminService::new(
        readers.clone(),
        nonces.clone(),
        trust.clone(),
        chain.clone(),
        anchors.clone(),
        policy.clone(),
        clock.clone(),
        admin_key,
    ));
    let sweeper = Arc::new(Sweeper::new(
        readers.clone(),
        nonces.clone(),
        decisions.clone(),
        healing_store.clone(),
        trust,
        healing.clone(),
        chain.clone(),
        stats,
        policy.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    let state = AppState {
        service,
        admin,
        healing,
        chain,
        anchors,
        readers,
        nonces,
        cards,
        decisions,
        healing_store,
        violations,
        policy,
        clock,
        metrics,
        degraded: Arc::new(AtomicBool::new(false)),
    };

    App {
        state,
        sweeper,
        coordinator,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Start the HTTP server and background workers.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!("Starting Tollgate v{}", env!("CARGO_PKG_VERSION"));

    if config.admin_key.is_empty() {
        warn!("ADMIN_API_KEY is not set; admin endpoints will reject all requests");
    }

    // Unreadable or unparsable policy is fatal for ingest but the process
    // still serves admin endpoints for recovery.
    let mut degraded_reason: Option<String> = None;
    let policy = match &config.policy_path {
        Some(path) => match PolicyHandle::from_file(path) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                error!(%err, path, "failed to load trust policy");
                degraded_reason = Some(err.to_string());
                Arc::new(PolicyHandle::fixed(TrustPolicy::default()))
            }
        },
        None => {
            info!("TRUST_POLICY_PATH not set, using built-in policy defaults");
            Arc::new(PolicyHandle::fixed(TrustPolicy::default()))
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app = build_state(policy, clock, config.admin_key.clone());
    let state = app.state.clone();

    // Startup chain verification (fatal class on failure).
    match state.chain.verify_chain(state.decisions.as_ref()).await {
        Ok(report) if !report.valid => {
            error!(
                first_broken_seq = ?report.first_broken_seq,
                class = ?report.class,
                "startup chain verification failed"
            );
            degraded_reason = Some("chain verification failed".to_string());
        }
        Err(err) => {
            error!(%err, "startup chain verification errored");
            degraded_reason = Some(err.to_string());
        }
        Ok(_) => {}
    }

    // Genesis must match the configured seed; a mismatch means the chain
    // belongs to a different deployment.
    if let Some(genesis) = state.chain.store().get(0).await? {
        let seed = state.policy.load().vdf.genesis_seed.clone();
        if genesis.vdf_output != crate::chain::genesis_output(&seed) {
            error!("genesis output does not match the configured seed");
            degraded_reason = Some("genesis mismatch".to_string());
        }
    }

    if let Some(reason) = degraded_reason {
        warn!(reason, "service starting in degraded mode; ingest disabled");
        state.set_degraded(true);
    }

    // Background workers.
    spawn_anchor_worker(
        state.anchors.clone(),
        app.coordinator.signal(),
        Duration::from_secs(1),
    );
    app.sweeper.clone().spawn(app.coordinator.signal());

    let router: Router = api::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);

    let coordinator = app.coordinator.clone();
    let signal = coordinator.signal();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = signal.wait() => {}
            }
        })
        .await?;

    coordinator.shutdown();
    info!("Shutdown complete");
    Ok(())
}
