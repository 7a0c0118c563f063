//! REST API endpoints for Tollgate.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::error::ApiError;
use crate::api::types::{
    ChallengeRespondRequest, ClearNoncesRequest, ClearNoncesResponse, ForceQuarantineRequest,
    ListQuery, PeerVoteRequest, RegisterReaderRequest, RegisterReaderResponse, ResetTrustRequest,
    RetryAnchorRequest, ReseedGenesisRequest, RotateReaderRequest, TollResponse, TrustResponse,
};
use crate::domain::{Anchor, ChainReport, DecisionRecord, Reader, TollEvent, ViolationRecord};
use crate::infra::TollError;
use crate::server::AppState;
use crate::service::ProcessOutcome;
use crate::trust::{ChallengeResult, ConsensusStatus};

/// Build the application router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Ingest + reader-facing endpoints
        .route("/api/toll", post(ingest_toll))
        .route("/api/probation/respond", post(respond_challenge))
        .route("/time", get(server_time))
        // Admin (X-API-Key)
        .route("/api/admin/reader/register", post(register_reader))
        .route("/api/admin/reader/rotate", post(rotate_reader))
        .route("/api/admin/reader/trust/reset", post(reset_trust))
        .route("/api/admin/reader/force_quarantine", post(force_quarantine))
        .route("/api/admin/peer_vote", post(peer_vote))
        .route("/api/admin/nonces/clear", post(clear_nonces))
        .route("/api/admin/vdf/reseed", post(reseed_genesis))
        .route("/api/admin/vdf/verify", get(verify_chain))
        .route("/api/admin/anchor/pending", get(pending_anchors))
        .route("/api/admin/anchor/retry", post(retry_anchor))
        .route("/api/admin/policy/reload", post(reload_policy))
        // Read-only telemetry
        .route("/api/readers", get(list_readers))
        .route("/api/decisions", get(list_decisions))
        .route("/api/violations", get(list_violations))
        .route("/api/blockchain/audit", get(blockchain_audit))
        .route("/api/stats/summary", get(stats_summary))
        .route("/api/system/status", get(system_status))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let supplied = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    state.admin.authorize(supplied).map_err(ApiError::from)
}

/// POST /api/toll - process one toll event.
async fn ingest_toll(
    State(state): State<AppState>,
    Json(event): Json<TollEvent>,
) -> Result<Json<TollResponse>, ApiError> {
    if state.is_degraded() {
        return Err(TollError::Degraded(
            "ingest is disabled pending recovery".to_string(),
        )
        .into());
    }

    match state.service.process_event(event).await? {
        ProcessOutcome::Decided {
            event_id,
            decision,
            reason_codes,
            trust,
            vdf_seq,
            new_balance,
        } => Ok(Json(TollResponse {
            decision,
            reason_codes,
            trust_score: trust.trust_score,
            event_id,
            vdf_seq,
            new_balance,
        })),
        ProcessOutcome::Rejected { code, trust } => {
            let detail = match trust {
                Some(snapshot) => format!(
                    "event rejected; reader trust {} ({:?})",
                    snapshot.trust_score, snapshot.status
                ),
                None => "event rejected".to_string(),
            };
            Err(ApiError::from_reject(code, detail))
        }
    }
}

/// GET /time - plain-text decimal seconds since epoch, for reader drift
/// bounding.
async fn server_time(State(state): State<AppState>) -> String {
    state.clock.now_unix().to_string()
}

/// POST /api/probation/respond - answer a probation challenge.
async fn respond_challenge(
    State(state): State<AppState>,
    Json(request): Json<ChallengeRespondRequest>,
) -> Result<Json<ChallengeResult>, ApiError> {
    let result = state
        .healing
        .submit_response(&request.reader_id, request.challenge_id, &request.response)
        .await?;
    Ok(Json(result))
}

/// POST /api/admin/reader/register
async fn register_reader(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterReaderRequest>,
) -> Result<Json<RegisterReaderResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let (reader, secret) = state
        .admin
        .register_reader(&request.reader_id, request.secret)
        .await?;
    Ok(Json(RegisterReaderResponse {
        reader_id: reader.reader_id,
        key_version: reader.key_version,
        secret,
    }))
}

/// POST /api/admin/reader/rotate
async fn rotate_reader(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RotateReaderRequest>,
) -> Result<Json<RegisterReaderResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let (key_version, secret) = state
        .admin
        .rotate_reader_secret(&request.reader_id)
        .await?;
    Ok(Json(RegisterReaderResponse {
        reader_id: request.reader_id,
        key_version,
        secret,
    }))
}

/// POST /api/admin/reader/trust/reset
async fn reset_trust(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResetTrustRequest>,
) -> Result<Json<TrustResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let snapshot = state
        .admin
        .reset_trust(&request.reader_id, request.score)
        .await?;
    Ok(Json(TrustResponse {
        reader_id: request.reader_id,
        trust_score: snapshot.trust_score,
        status: snapshot.status,
    }))
}

/// POST /api/admin/reader/force_quarantine
async fn force_quarantine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ForceQuarantineRequest>,
) -> Result<Json<TrustResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let snapshot = state
        .admin
        .force_quarantine(&request.reader_id, &request.reason)
        .await?;
    Ok(Json(TrustResponse {
        reader_id: request.reader_id,
        trust_score: snapshot.trust_score,
        status: snapshot.status,
    }))
}

/// POST /api/admin/peer_vote
async fn peer_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PeerVoteRequest>,
) -> Result<Json<ConsensusStatus>, ApiError> {
    require_admin(&state, &headers)?;
    let status = state
        .healing
        .cast_vote(
            &request.subject_reader_id,
            &request.voter_reader_id,
            request.vote,
        )
        .await?;
    Ok(Json(status))
}

/// POST /api/admin/nonces/clear
async fn clear_nonces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ClearNoncesRequest>,
) -> Result<Json<ClearNoncesResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let removed = state.admin.clear_nonces(request.before).await?;
    Ok(Json(ClearNoncesResponse { removed }))
}

/// POST /api/admin/vdf/reseed - only valid on an empty chain.
async fn reseed_genesis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReseedGenesisRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    let genesis = state.admin.reseed_vdf_genesis(&request.seed).await?;
    Ok(Json(serde_json::json!({
        "seq": genesis.seq,
        "vdf_output": hex::encode(genesis.vdf_output),
    })))
}

/// GET /api/admin/vdf/verify - full-chain verification.
async fn verify_chain(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChainReport>, ApiError> {
    require_admin(&state, &headers)?;
    let report = state.chain.verify_chain(state.decisions.as_ref()).await?;
    Ok(Json(report))
}

/// GET /api/admin/anchor/pending
async fn pending_anchors(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Anchor>>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.admin.list_pending_anchors().await?))
}

/// POST /api/admin/anchor/retry
async fn retry_anchor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RetryAnchorRequest>,
) -> Result<Json<Anchor>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.admin.retry_anchor(request.anchor_id).await?))
}

/// POST /api/admin/policy/reload
async fn reload_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    state.admin.reload_policy()?;
    Ok(Json(serde_json::json!({ "reloaded": true })))
}

/// GET /api/readers - registry with trust snapshots (secrets never leave).
async fn list_readers(State(state): State<AppState>) -> Result<Json<Vec<Reader>>, ApiError> {
    Ok(Json(state.readers.list().await.map_err(ApiError::from)?))
}

/// GET /api/decisions - recent decision telemetry.
async fn list_decisions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DecisionRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(100).min(1000);
    Ok(Json(state.decisions.recent(limit).await?))
}

/// GET /api/violations - recent penalties and rewards.
async fn list_violations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ViolationRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(100).min(1000);
    Ok(Json(state.violations.recent(limit).await?))
}

/// GET /api/blockchain/audit - chain head and anchor history.
async fn blockchain_audit(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let head = state.chain.store().head().await?;
    let total_links = state.chain.store().count().await?;
    let anchors = state.anchors.list().await?;

    Ok(Json(serde_json::json!({
        "chain": {
            "total_links": total_links,
            "head": head.map(|h| serde_json::json!({
                "seq": h.seq,
                "event_id": h.event_id,
                "vdf_output": hex::encode(h.vdf_output),
                "computed_at": h.computed_at,
            })),
        },
        "anchors": anchors,
    })))
}

/// GET /api/stats/summary
async fn stats_summary(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let decisions = state.decisions.count().await?;
    let links = state.chain.store().count().await?;
    Ok(Json(serde_json::json!({
        "counters": state.metrics.snapshot(),
        "decisions": decisions,
        "chain_links": links,
    })))
}

/// GET /api/system/status
async fn system_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let pending = state.anchors.pending().await?.len();
    let readers = state.readers.list().await?.len();
    Ok(Json(serde_json::json!({
        "status": if state.is_degraded() { "degraded" } else { "ok" },
        "ingest_enabled": !state.is_degraded(),
        "readers": readers,
        "pending_anchors": pending,
        "now": state.clock.now_unix(),
    })))
}
