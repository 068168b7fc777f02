//! REST handlers for rule management, approvals, rollbacks and
//! operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use autopilot_core::store::RuleStore;
use autopilot_core::types::{ActionHistory, Execution, Rule};
use autopilot_engine::{ApprovalService, RollbackManager, RuleDefinition, RuleScheduler, RuleService};
use axum::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the calling owner's id.
pub const OWNER_HEADER: &str = "x-owner-id";

const DEFAULT_ROLLBACK_REASON: &str = "manual rollback";
const DEFAULT_REJECT_REASON: &str = "rejected by reviewer";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RuleStore>,
    pub rules: Arc<RuleService>,
    pub scheduler: Arc<RuleScheduler>,
    pub approvals: Arc<ApprovalService>,
    pub rollbacks: Arc<RollbackManager>,
    pub node_id: String,
    pub start_time: Instant,
}

/// Owner id taken from the `x-owner-id` header.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| ApiError::unauthorized(format!("missing {OWNER_HEADER} header")))?;
        let text = value
            .to_str()
            .map_err(|_| ApiError::unauthorized(format!("invalid {OWNER_HEADER} header")))?;
        Uuid::parse_str(text.trim())
            .map(Caller)
            .map_err(|_| ApiError::unauthorized(format!("{OWNER_HEADER} must be a UUID")))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

fn reason_or(body: Option<Json<ReasonBody>>, default: &str) -> String {
    body.and_then(|Json(b)| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub running_rules: usize,
}

// ─── Operational ───────────────────────────────────────────────────────────

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_rules: state.scheduler.registry().running(),
    })
}

// ─── Rules ─────────────────────────────────────────────────────────────────

/// GET /api/v1/rules
pub async fn list_rules(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Rule>>, ApiError> {
    Ok(Json(state.rules.list(caller).await?))
}

/// POST /api/v1/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(definition): Json<RuleDefinition>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let rule = state.rules.create(caller, &definition, Utc::now()).await?;
    metrics::counter!("api.rules.created").increment(1);
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /api/v1/rules/:id
pub async fn get_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.rules.get(caller, rule_id).await?))
}

/// PUT /api/v1/rules/:id
pub async fn update_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
    Json(definition): Json<RuleDefinition>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(
        state.rules.update(caller, rule_id, &definition, Utc::now()).await?,
    ))
}

/// DELETE /api/v1/rules/:id
pub async fn delete_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.rules.delete(caller, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/rules/:id/activate
pub async fn activate_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.rules.activate(caller, rule_id, Utc::now()).await?))
}

/// POST /api/v1/rules/:id/pause
pub async fn pause_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.rules.pause(caller, rule_id, Utc::now()).await?))
}

/// POST /api/v1/rules/:id/resume
pub async fn resume_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.rules.resume(caller, rule_id, Utc::now()).await?))
}

/// POST /api/v1/rules/:id/duplicate
pub async fn duplicate_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let copy = state.rules.duplicate(caller, rule_id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// POST /api/v1/rules/:id/run — runs the rule now and returns its execution.
pub async fn run_rule(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Execution>, ApiError> {
    Ok(Json(state.scheduler.run_now(rule_id, caller).await?))
}

/// GET /api/v1/rules/:id/executions
pub async fn list_executions(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    state.rules.get(caller, rule_id).await?;
    Ok(Json(state.store.list_executions(rule_id).await?))
}

/// GET /api/v1/rules/:id/history
pub async fn list_history(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Vec<ActionHistory>>, ApiError> {
    state.rules.get(caller, rule_id).await?;
    Ok(Json(state.store.list_history(rule_id).await?))
}

// ─── Approvals and rollbacks ───────────────────────────────────────────────

/// GET /api/v1/approvals
pub async fn list_approvals(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<ActionHistory>>, ApiError> {
    Ok(Json(state.approvals.pending(caller).await?))
}

/// POST /api/v1/history/:id/approve
pub async fn approve_action(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(history_id): Path<Uuid>,
) -> Result<Json<ActionHistory>, ApiError> {
    Ok(Json(
        state.approvals.approve(history_id, caller, Utc::now()).await?,
    ))
}

/// POST /api/v1/history/:id/reject
pub async fn reject_action(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(history_id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<ActionHistory>, ApiError> {
    let reason = reason_or(body, DEFAULT_REJECT_REASON);
    Ok(Json(
        state
            .approvals
            .reject(history_id, caller, &reason, Utc::now())
            .await?,
    ))
}

/// POST /api/v1/history/:id/rollback
pub async fn rollback_action(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(history_id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> Result<Json<ActionHistory>, ApiError> {
    let reason = reason_or(body, DEFAULT_ROLLBACK_REASON);
    Ok(Json(
        state
            .rollbacks
            .rollback(history_id, caller, &reason, Utc::now())
            .await?,
    ))
}
