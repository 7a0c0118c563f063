//! Structured API error responses.
//!
//! Rejections from the ingest verifier are business errors with fixed
//! status codes (crypto 401, replay 409, suspended 423, rate 429, drift
//! 408); infrastructure errors map by class. Blocked decisions are NOT
//! errors: they return 200 with `decision = "block"`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::RejectCode;
use crate::infra::TollError;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

/// API-facing error with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: detail.into(),
        }
    }

    /// Ingest rejection with its fixed status code.
    pub fn from_reject(code: RejectCode, detail: impl Into<String>) -> Self {
        let status = match code {
            RejectCode::UnknownReader
            | RejectCode::BadKeyVersion
            | RejectCode::BadSignature => StatusCode::UNAUTHORIZED,
            RejectCode::Replay => StatusCode::CONFLICT,
            RejectCode::ReaderSuspended => StatusCode::LOCKED,
            RejectCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RejectCode::StaleTimestamp => StatusCode::REQUEST_TIMEOUT,
        };
        Self::new(status, code.to_string(), detail)
    }
}

impl From<TollError> for ApiError {
    fn from(err: TollError) -> Self {
        let (status, code) = match &err {
            TollError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            TollError::ReaderNotFound(_) => (StatusCode::NOT_FOUND, "READER_NOT_FOUND"),
            TollError::CardNotFound(_) => (StatusCode::NOT_FOUND, "CARD_NOT_FOUND"),
            TollError::QuarantineNotFound(_) => (StatusCode::NOT_FOUND, "QUARANTINE_NOT_FOUND"),
            TollError::ChallengeNotFound(_) => (StatusCode::NOT_FOUND, "CHALLENGE_NOT_FOUND"),
            TollError::AnchorNotFound(_) => (StatusCode::NOT_FOUND, "ANCHOR_NOT_FOUND"),
            TollError::ReaderExists(_) => (StatusCode::CONFLICT, "READER_EXISTS"),
            TollError::ChainNotEmpty => (StatusCode::CONFLICT, "CHAIN_NOT_EMPTY"),
            TollError::InvalidVote(_) => (StatusCode::BAD_REQUEST, "INVALID_VOTE"),
            TollError::InvalidChallenge(_) => (StatusCode::BAD_REQUEST, "INVALID_CHALLENGE"),
            TollError::TariffNotFound(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TARIFF_NOT_FOUND"),
            TollError::Policy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "POLICY_ERROR"),
            TollError::ChainBroken { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CHAIN_BROKEN"),
            TollError::Ledger(_) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR"),
            TollError::DeadlineExceeded(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEADLINE_EXCEEDED"),
            TollError::Degraded(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_DEGRADED"),
            TollError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            TollError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_codes_use_fixed_status_codes() {
        assert_eq!(
            ApiError::from_reject(RejectCode::BadSignature, "").status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from_reject(RejectCode::Replay, "").status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from_reject(RejectCode::ReaderSuspended, "").status,
            StatusCode::LOCKED
        );
        assert_eq!(
            ApiError::from_reject(RejectCode::RateLimited, "").status,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from_reject(RejectCode::StaleTimestamp, "").status,
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn infra_errors_map_by_class() {
        let err: ApiError = TollError::Unauthorized("bad key".to_string()).into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err: ApiError = TollError::ChainNotEmpty.into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = TollError::Degraded("startup verify failed".to_string()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
