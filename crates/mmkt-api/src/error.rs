//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from mmkt-license, mmkt-ledger, and mmkt-payout
//! to HTTP status codes. Returns JSON error bodies with a
//! machine-readable code and a message. Internal error details are
//! never exposed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use mmkt_ledger::LedgerError;
use mmkt_license::LicenseError;
use mmkt_payout::PayoutError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND", "CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Application-level error type that implements [`IntoResponse`].
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication failure (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authorization failure (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Logged, never returned verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// License domain errors: wrong-state transitions and duplicates are
/// conflicts, lookups are 404s, malformed keys are validation errors.
impl From<LicenseError> for AppError {
    fn from(err: LicenseError) -> Self {
        match &err {
            LicenseError::NotFound(_) => Self::NotFound(err.to_string()),
            LicenseError::MalformedKey(_) => Self::Validation(err.to_string()),
            LicenseError::AlreadyLicensed { .. }
            | LicenseError::CannotActivate { .. }
            | LicenseError::InvalidTransition { .. }
            | LicenseError::NotATrial(_) => Self::Conflict(err.to_string()),
            LicenseError::KeyCollision { .. } => Self::Internal(err.to_string()),
        }
    }
}

/// Ledger domain errors: insufficient funds and resolved adjustments
/// are conflicts, bad amounts are validation errors.
impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::InvalidAmount { .. } => Self::Validation(err.to_string()),
            LedgerError::InsufficientBalance { .. }
            | LedgerError::AdjustmentNotPending { .. } => Self::Conflict(err.to_string()),
            LedgerError::AdjustmentNotFound(_) => Self::NotFound(err.to_string()),
            LedgerError::Money(_) => Self::Validation(err.to_string()),
        }
    }
}

/// Payout domain errors: wrong-state batches are conflicts (this is
/// how double-processing surfaces over HTTP).
impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        match &err {
            PayoutError::BatchNotFound(_) => Self::NotFound(err.to_string()),
            PayoutError::InvalidBatchState { .. } => Self::Conflict(err.to_string()),
            PayoutError::Ledger(inner) => match inner {
                LedgerError::AdjustmentNotFound(_) => Self::NotFound(err.to_string()),
                LedgerError::InsufficientBalance { .. }
                | LedgerError::AdjustmentNotPending { .. } => Self::Conflict(err.to_string()),
                _ => Self::Validation(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_and_code().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Validation("x".into()).status_and_code().0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Conflict("x".into()).status_and_code().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn license_errors_map_to_conflict_or_not_found() {
        let err: AppError = LicenseError::NotFound("lic:x".into()).into();
        assert_eq!(err.status_and_code().0, StatusCode::NOT_FOUND);

        let err: AppError = LicenseError::NotATrial(mmkt_core::LicenseId::new()).into();
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn payout_wrong_state_is_conflict() {
        let err: AppError = PayoutError::InvalidBatchState {
            batch: mmkt_core::BatchId::new(),
            status: mmkt_payout::BatchStatus::Processing,
            operation: "process",
        }
        .into();
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
    }

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn into_response_internal_hides_details() {
        let (status, body) = response_parts(AppError::Internal("db pool exhausted".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert!(!body.error.message.contains("db pool"));
    }

    #[tokio::test]
    async fn into_response_conflict_carries_message() {
        let (status, body) = response_parts(AppError::Conflict("batch is processing".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.error.message.contains("batch is processing"));
    }
}
