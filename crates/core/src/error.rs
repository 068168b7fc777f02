use thiserror::Error;
use uuid::Uuid;

pub type AutopilotResult<T> = Result<T, AutopilotError>;

#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    MetricSource(#[from] MetricSourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failures of the rule persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("rule {0} not found")]
    RuleNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("action history {0} not found")]
    HistoryNotFound(Uuid),

    #[error("execution {0} already finalized")]
    AlreadyFinalized(Uuid),

    #[error("rule {0} changed status concurrently")]
    StatusConflict(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0} ms")]
    Timeout(u64),
}

/// Failures of the metric collaborator. Empty data is not an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricSourceError {
    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    #[error("metric fetch timed out after {0} ms")]
    Timeout(u64),
}

/// Reasons a rule definition is rejected at save time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule must have at least one condition")]
    NoConditions,

    #[error("rule must have at least one action")]
    NoActions,

    #[error("check frequency must be at least one minute")]
    InvalidFrequency,

    #[error("max daily actions must be at least one when set")]
    InvalidDailyCap,

    #[error("duplicate {kind} position {position}")]
    DuplicatePosition { kind: &'static str, position: u32 },

    #[error("condition {position}: time window must be at least one day")]
    InvalidWindow { position: u32 },

    #[error("condition {position}: threshold must be a finite number")]
    NonFiniteThreshold { position: u32 },

    #[error("condition {position}: between requires threshold_max >= threshold")]
    InvalidBetween { position: u32 },

    #[error("action {position}: {reason}")]
    InvalidAction { position: u32, reason: String },

    #[error("action {position}: {action} is not supported on {platform}")]
    UnsupportedOnPlatform {
        position: u32,
        action: String,
        platform: String,
    },
}
