use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quota_common::ParseError;
use quota_ledger::LedgerError;
use tracing::error;

/// Error returned by every handler; rendered as `{error, code, ...}` JSON.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(message) => {
                let body = serde_json::json!({
                    "error": message,
                    "code": "bad_request",
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Ledger(err) => err,
        };

        // Denials are shaped as an upgrade prompt for the client.
        if let LedgerError::Denied(denial) = &err {
            let (current, limit) = denial.usage_pair().unzip();
            let body = serde_json::json!({
                "error": denial.reason(),
                "code": "denied",
                "denial": denial,
                "upgrade_required": denial.upgrade_required(),
                "current_usage": current,
                "limit": limit,
            });
            return (StatusCode::FORBIDDEN, Json(body)).into_response();
        }

        let (status, code) = match &err {
            LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
            LedgerError::PlanNotFound(_) => (StatusCode::NOT_FOUND, "plan_not_found"),
            LedgerError::ReservationNotFound(_) => {
                (StatusCode::NOT_FOUND, "reservation_not_found")
            }
            LedgerError::AccountExists(_) => (StatusCode::CONFLICT, "account_exists"),
            LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
            LedgerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            LedgerError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            LedgerError::DefaultPlanMissing(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "default_plan_missing")
            }
            LedgerError::Denied(_) => (StatusCode::FORBIDDEN, "denied"),
        };

        if status.is_server_error() {
            error!(error = %err, code, "ledger request failed");
        }

        let body = serde_json::json!({
            "error": err.to_string(),
            "code": code,
            "retryable": err.is_transient(),
        });
        (status, Json(body)).into_response()
    }
}
