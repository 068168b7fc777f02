//! Maps engine errors onto HTTP responses.

use autopilot_core::error::StoreError;
use autopilot_engine::{ApprovalError, LifecycleError, RollbackError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

fn store_error(e: &StoreError) -> ApiError {
    match e {
        StoreError::RuleNotFound(_) | StoreError::ExecutionNotFound(_) | StoreError::HistoryNotFound(_) => {
            ApiError::new(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        StoreError::Unavailable(_) | StoreError::Timeout(_) => {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
        StoreError::AlreadyFinalized(_) | StoreError::StatusConflict(_) => {
            ApiError::new(StatusCode::CONFLICT, "conflict", e.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        store_error(&e)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match &e {
            LifecycleError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "rule_not_found", e.to_string()),
            LifecycleError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_transition", e.to_string())
            }
            LifecycleError::AlreadyRunning(_) => Self::new(StatusCode::CONFLICT, "already_running", e.to_string()),
            LifecycleError::Validation(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_rule", e.to_string())
            }
            LifecycleError::Store(inner) => store_error(inner),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(e: ApprovalError) -> Self {
        match &e {
            ApprovalError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "history_not_found", e.to_string()),
            ApprovalError::NotPending { .. } => Self::new(StatusCode::CONFLICT, "not_pending", e.to_string()),
            ApprovalError::DailyCapReached(_) => {
                Self::new(StatusCode::CONFLICT, "daily_cap_reached", e.to_string())
            }
            ApprovalError::InProgress(_) => {
                Self::new(StatusCode::CONFLICT, "approval_in_progress", e.to_string())
            }
            ApprovalError::Platform(_) => Self::new(StatusCode::BAD_GATEWAY, "platform_error", e.to_string()),
            ApprovalError::Store(inner) => store_error(inner),
        }
    }
}

impl From<RollbackError> for ApiError {
    fn from(e: RollbackError) -> Self {
        match &e {
            RollbackError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "history_not_found", e.to_string()),
            RollbackError::NotRollbackable(_) => {
                Self::new(StatusCode::CONFLICT, "not_rollbackable", e.to_string())
            }
            RollbackError::AlreadyRolledBack(_) => {
                Self::new(StatusCode::CONFLICT, "already_rolled_back", e.to_string())
            }
            RollbackError::NotApplied { .. } => Self::new(StatusCode::CONFLICT, "not_applied", e.to_string()),
            RollbackError::Restore(_) => Self::new(StatusCode::BAD_GATEWAY, "restore_failed", e.to_string()),
            RollbackError::Store(inner) => store_error(inner),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = self.code, error = %self.message, "Request failed");
            metrics::counter!("api.errors").increment(1);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}
