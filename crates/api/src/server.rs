//! API server — HTTP REST surface plus the Prometheus exporter.

use std::net::SocketAddr;

use autopilot_core::config::AppConfig;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{self, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        // Rules
        .route("/api/v1/rules", get(rest::list_rules).post(rest::create_rule))
        .route(
            "/api/v1/rules/:id",
            get(rest::get_rule)
                .put(rest::update_rule)
                .delete(rest::delete_rule),
        )
        .route("/api/v1/rules/:id/activate", post(rest::activate_rule))
        .route("/api/v1/rules/:id/pause", post(rest::pause_rule))
        .route("/api/v1/rules/:id/resume", post(rest::resume_rule))
        .route("/api/v1/rules/:id/duplicate", post(rest::duplicate_rule))
        .route("/api/v1/rules/:id/run", post(rest::run_rule))
        .route("/api/v1/rules/:id/executions", get(rest::list_executions))
        .route("/api/v1/rules/:id/history", get(rest::list_history))
        // Approvals and rollbacks
        .route("/api/v1/approvals", get(rest::list_approvals))
        .route("/api/v1/history/:id/approve", post(rest::approve_action))
        .route("/api/v1/history/:id/reject", post(rest::reject_action))
        .route("/api/v1/history/:id/rollback", post(rest::rollback_action))
        // Operational
        .route("/health", get(rest::health_check))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
