//! Request and response bodies for the REST API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Decision, ReaderStatus, Vote};
use crate::trust::ChallengeResponse;

/// Successful ingest outcome (allow and block are both 200s).
#[derive(Debug, Serialize)]
pub struct TollResponse {
    pub decision: Decision,
    pub reason_codes: Vec<String>,
    pub trust_score: i32,
    pub event_id: Uuid,
    pub vdf_seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterReaderRequest {
    pub reader_id: String,
    /// Optional explicit secret; generated when omitted.
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterReaderResponse {
    pub reader_id: String,
    pub key_version: u32,
    /// Plaintext secret (hex); shown only at registration/rotation.
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RotateReaderRequest {
    pub reader_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetTrustRequest {
    pub reader_id: String,
    pub score: i32,
}

#[derive(Debug, Serialize)]
pub struct TrustResponse {
    pub reader_id: String,
    pub trust_score: i32,
    pub status: ReaderStatus,
}

#[derive(Debug, Deserialize)]
pub struct ForceQuarantineRequest {
    pub reader_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PeerVoteRequest {
    pub subject_reader_id: String,
    pub voter_reader_id: String,
    pub vote: Vote,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRespondRequest {
    pub reader_id: String,
    pub challenge_id: Uuid,
    pub response: ChallengeResponse,
}

#[derive(Debug, Deserialize)]
pub struct ClearNoncesRequest {
    /// Unix seconds; records observed before this are dropped.
    pub before: i64,
}

#[derive(Debug, Serialize)]
pub struct ClearNoncesResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ReseedGenesisRequest {
    pub seed: String,
}

#[derive(Debug, Deserialize)]
pub struct RetryAnchorRequest {
    pub anchor_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}
