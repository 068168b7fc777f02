//! Drives the REST router end to end against in-memory collaborators.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use autopilot_api::{router, AppState};
    use autopilot_core::event_bus::noop_sink;
    use autopilot_core::metric_source::DailyMetrics;
    use autopilot_core::types::*;
    use autopilot_engine::{
        ApprovalService, EngineContext, RollbackManager, RuleScheduler, RuleService, RunRegistry,
    };
    use autopilot_platforms::{PlatformRouter, SimulatedAdsClient};
    use autopilot_store::{InMemoryMetricSource, InMemoryRuleStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct App {
        router: Router,
        google: Arc<SimulatedAdsClient>,
    }

    fn app() -> App {
        let store = Arc::new(InMemoryRuleStore::new());
        let metrics = Arc::new(InMemoryMetricSource::new());
        let google = Arc::new(SimulatedAdsClient::google());
        google.add_entity(AdEntity {
            id: "cmp-9".into(),
            name: "Generic - Shoes".into(),
            platform: AdPlatform::Google,
            entity_type: EntityType::Campaign,
            account_id: None,
            status: EntityStatus::Active,
            daily_budget: Some(80.0),
            bid_amount: None,
            bid_cap: None,
        });
        let mut day = DailyMetrics::new(Utc::now().date_naive());
        day.spend = 120.0;
        day.revenue = 60.0;
        metrics.record(AdPlatform::Google, "cmp-9", day);

        let ctx = EngineContext::builder(
            store.clone(),
            metrics,
            PlatformRouter::new().with_client(google.clone()),
        )
        .build();
        let registry = Arc::new(RunRegistry::new());
        let state = AppState {
            store: store.clone(),
            rules: Arc::new(RuleService::new(store, registry.clone(), noop_sink())),
            scheduler: Arc::new(RuleScheduler::new(ctx.clone(), registry)),
            approvals: Arc::new(ApprovalService::new(ctx.clone())),
            rollbacks: Arc::new(RollbackManager::new(&ctx)),
            node_id: "test-node".into(),
            start_time: Instant::now(),
        };
        App {
            router: router(state),
            google,
        }
    }

    fn rule_body(require_approval: bool) -> Value {
        json!({
            "name": "Pause money losers",
            "platform": "google",
            "entity_type": "campaign",
            "require_approval": require_approval,
            "conditions": [
                { "position": 0, "metric": "roas", "operator": "<", "threshold": 1.0, "time_window_days": 7 }
            ],
            "actions": [
                { "position": 0, "action": { "type": "pause" } }
            ]
        })
    }

    async fn call(app: &App, method: &str, uri: &str, owner: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header("x-owner-id", owner.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn active_rule(app: &App, owner: Uuid, require_approval: bool) -> String {
        let (status, rule) = call(app, "POST", "/api/v1/rules", Some(owner), Some(rule_body(require_approval))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(rule["status"], "draft");
        let id = rule["id"].as_str().unwrap().to_string();
        let (status, rule) = call(app, "POST", &format!("/api/v1/rules/{id}/activate"), Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rule["status"], "active");
        id
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["node_id"], "test-node");
    }

    #[tokio::test]
    async fn test_missing_owner_header_is_unauthorized() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/v1/rules", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_invalid_rule_is_unprocessable() {
        let app = app();
        let mut body = rule_body(false);
        body["conditions"] = json!([]);
        let (status, body) = call(&app, "POST", "/api/v1/rules", Some(Uuid::new_v4()), Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_rule");
    }

    #[tokio::test]
    async fn test_run_then_rollback() {
        let app = app();
        let owner = Uuid::new_v4();
        let id = active_rule(&app, owner, false).await;

        let (status, execution) = call(&app, "POST", &format!("/api/v1/rules/{id}/run"), Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(execution["status"], "completed");
        assert_eq!(execution["actions_taken"], 1);
        assert_eq!(app.google.entity("cmp-9").unwrap().entity.status, EntityStatus::Paused);

        let (_, executions) = call(&app, "GET", &format!("/api/v1/rules/{id}/executions"), Some(owner), None).await;
        assert_eq!(executions.as_array().unwrap().len(), 1);

        let (_, history) = call(&app, "GET", &format!("/api/v1/rules/{id}/history"), Some(owner), None).await;
        let rows = history.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], "applied");
        let history_id = rows[0]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/history/{history_id}/rollback");
        let (status, row) = call(&app, "POST", &uri, Some(owner), Some(json!({ "reason": "false alarm" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["status"], "rolled_back");
        assert_eq!(row["rollback_reason"], "false alarm");
        assert_eq!(app.google.entity("cmp-9").unwrap().entity.status, EntityStatus::Active);

        let (status, body) = call(&app, "POST", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_rolled_back");
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let app = app();
        let owner = Uuid::new_v4();
        let id = active_rule(&app, owner, true).await;

        let (_, execution) = call(&app, "POST", &format!("/api/v1/rules/{id}/run"), Some(owner), None).await;
        assert_eq!(execution["actions_pending"], 1);
        assert_eq!(app.google.mutation_count(), 0);

        let (status, pending) = call(&app, "GET", "/api/v1/approvals", Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = pending.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        let history_id = rows[0]["id"].as_str().unwrap().to_string();

        let (status, row) = call(
            &app,
            "POST",
            &format!("/api/v1/history/{history_id}/approve"),
            Some(owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["status"], "applied");
        assert_eq!(app.google.entity("cmp-9").unwrap().entity.status, EntityStatus::Paused);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/history/{history_id}/reject"),
            Some(owner),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_pending");
    }

    #[tokio::test]
    async fn test_foreign_rule_is_not_found() {
        let app = app();
        let id = active_rule(&app, Uuid::new_v4(), false).await;
        let (status, body) = call(&app, "GET", &format!("/api/v1/rules/{id}"), Some(Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "rule_not_found");
    }

    #[tokio::test]
    async fn test_pause_twice_conflicts() {
        let app = app();
        let owner = Uuid::new_v4();
        let id = active_rule(&app, owner, false).await;
        let uri = format!("/api/v1/rules/{id}/pause");
        let (status, rule) = call(&app, "POST", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rule["status"], "paused");
        assert!(rule["next_execution_at"].is_null());
        let (status, body) = call(&app, "POST", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");
    }
}
