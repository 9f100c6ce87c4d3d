//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use domain_billing::BillingError;

use crate::auth::AuthError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Signed request whose signature did not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Provider facts contradict the ledger; nothing was allocated
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// The payment provider is unreachable; the caller should retry
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone()),
            ApiError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg.clone()),
            ApiError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "Signature is missing or invalid".to_string(),
            ),
            ApiError::Integrity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "integrity_violation", msg.clone()),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::InvalidAmount(_)
            | BillingError::InvalidPaymentMethod(_)
            | BillingError::NoOutstandingBalance(_)
            | BillingError::VisitClosed(_)
            | BillingError::InvariantViolation(_) => ApiError::Validation(message),
            BillingError::MalformedNotification(_) | BillingError::Temporal(_) => ApiError::BadRequest(message),
            BillingError::VisitNotFound(_)
            | BillingError::LineItemNotFound(_)
            | BillingError::PaymentNotFound(_)
            | BillingError::PaymentIntentNotFound(_)
            | BillingError::ArtifactNotFound { .. }
            | BillingError::LeakNotFound(_)
            | BillingError::ReconciliationNotFound(_) => ApiError::NotFound(message),
            BillingError::AlreadyFinalized(_) | BillingError::AlreadyResolved(_) => ApiError::Conflict(message),
            BillingError::InvalidSignature => ApiError::InvalidSignature,
            BillingError::IntegrityViolation { .. } => ApiError::Integrity(message),
            BillingError::GatewayUnavailable { .. } => ApiError::Unavailable(message),
            BillingError::Port(port) if port.is_not_found() => ApiError::NotFound(message),
            BillingError::Port(port) if port.is_conflict() => ApiError::Conflict(message),
            BillingError::Port(port) if port.is_transient() => ApiError::Unavailable(message),
            BillingError::Port(_) => {
                error!(error = %message, "Ledger storage failure");
                ApiError::Storage(message)
            }
            BillingError::Configuration(_) => ApiError::Internal(message),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingPermission(permission) => ApiError::Forbidden(permission),
            _ => ApiError::Unauthorized,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_kernel::{LeakRecordId, PortError, VisitId};

    fn status(err: BillingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_billing_error_status_mapping() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(status(BillingError::invalid_amount("zero")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(BillingError::VisitNotFound(VisitId::new())), StatusCode::NOT_FOUND);
        assert_eq!(status(BillingError::AlreadyFinalized(date)), StatusCode::CONFLICT);
        assert_eq!(status(BillingError::AlreadyResolved(LeakRecordId::new())), StatusCode::CONFLICT);
        assert_eq!(status(BillingError::InvalidSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status(BillingError::integrity("CLN-1", "visit mismatch")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status(BillingError::GatewayUnavailable {
                message: "timeout".to_string(),
                retryable: true
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_port_errors_by_kind() {
        assert_eq!(
            status(BillingError::Port(PortError::connection("refused"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(BillingError::Port(PortError::internal("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
