use autopilot_core::error::{MetricSourceError, StoreError, ValidationError};
use autopilot_core::types::{ActionStatus, RuleStatus};
use autopilot_platforms::PlatformError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Run-level failure. Finalizes the execution as `failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("metric source failed: {0}")]
    MetricSource(#[from] MetricSourceError),

    #[error("entity listing failed: {0}")]
    Platform(#[from] PlatformError),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Store(_) => "store",
            EngineError::MetricSource(_) => "metric_source",
            EngineError::Platform(_) => "platform",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Internal(_) => "internal",
        }
    }

    pub fn is_metric_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout {
                operation: "metric_fetch",
                ..
            }
        )
    }

    /// Structured detail stored on the failed execution.
    pub fn details(&self) -> serde_json::Value {
        match self {
            EngineError::Platform(e) => json!({ "kind": self.kind(), "response": e.to_payload() }),
            EngineError::Timeout {
                operation,
                timeout_ms,
            } => json!({ "kind": self.kind(), "operation": operation, "timeout_ms": timeout_ms }),
            _ => json!({ "kind": self.kind(), "message": self.to_string() }),
        }
    }
}

/// Failure of a single action application. Recorded on the audit row and
/// never aborts sibling actions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("entity {entity_id} has no {field}")]
    MissingField {
        entity_id: String,
        field: &'static str,
    },

    #[error("no previous value recorded to restore")]
    NothingToRestore,
}

impl ActionError {
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ActionError::Platform(e) => e.to_payload(),
            _ => json!({ "error": { "code": "invalid_action", "message": self.to_string() } }),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollbackError {
    #[error("action history {0} not found")]
    NotFound(Uuid),

    #[error("action {0} cannot be rolled back")]
    NotRollbackable(Uuid),

    #[error("action {0} was already rolled back")]
    AlreadyRolledBack(Uuid),

    #[error("action {id} is {status:?}, only applied actions can be rolled back")]
    NotApplied { id: Uuid, status: ActionStatus },

    #[error("restore failed: {0}")]
    Restore(#[from] ActionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("rule {0} not found")]
    NotFound(Uuid),

    #[error("cannot move rule from {from:?} to {to:?}")]
    InvalidTransition { from: RuleStatus, to: RuleStatus },

    #[error("rule {0} is already running")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("action history {0} not found")]
    NotFound(Uuid),

    #[error("action {id} is {status:?}, not pending approval")]
    NotPending { id: Uuid, status: ActionStatus },

    #[error("rule {0} reached its daily action limit")]
    DailyCapReached(Uuid),

    #[error("action {0} is already being approved or rejected")]
    InProgress(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
