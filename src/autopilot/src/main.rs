//! Ad Autopilot — rule-driven automation for ad campaigns across Meta,
//! Google and TikTok.
//!
//! Main entry point that wires the engine, starts the scheduler loop and
//! serves the REST API.

mod demo;

use std::sync::Arc;
use std::time::Instant;

use autopilot_api::{ApiServer, AppState};
use autopilot_core::config::AppConfig;
use autopilot_core::event_bus::TracingSink;
use autopilot_core::notify::LogNotifier;
use autopilot_engine::{
    estimator_from_config, ApprovalService, EngineContext, EngineSettings, RollbackManager,
    RuleScheduler, RuleService, RunRegistry,
};
use autopilot_platforms::{PlatformRouter, SimulatedAdsClient};
use autopilot_store::{InMemoryMetricSource, InMemoryRuleStore};
use chrono::Utc;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Owner of the demo rules when none is given.
const DEMO_OWNER: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

#[derive(Parser, Debug)]
#[command(name = "autopilot")]
#[command(about = "Rule-driven automation for ad campaigns")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "AUTOPILOT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "AUTOPILOT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "AUTOPILOT__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Scheduler tick interval in seconds (overrides config)
    #[arg(long, env = "AUTOPILOT__SCHEDULER__TICK_INTERVAL_SECS")]
    tick_secs: Option<u64>,

    /// Owner id for the seeded demo rules
    #[arg(long, env = "AUTOPILOT__DEMO_OWNER_ID")]
    demo_owner: Option<Uuid>,

    /// Start without demo entities and rules
    #[arg(long, default_value_t = false)]
    no_demo: bool,

    /// Run a single scheduler tick, print the executions and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "autopilot=info,autopilot_engine=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Ad Autopilot starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(secs) = cli.tick_secs {
        config.scheduler.tick_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        tick_secs = config.scheduler.tick_interval_secs,
        max_concurrent_rules = config.scheduler.max_concurrent_rules,
        "Configuration loaded"
    );

    // Collaborators
    let store = Arc::new(InMemoryRuleStore::new());
    let metrics = Arc::new(InMemoryMetricSource::new());
    let meta = Arc::new(SimulatedAdsClient::meta());
    let google = Arc::new(SimulatedAdsClient::google());
    let tiktok = Arc::new(SimulatedAdsClient::tiktok());
    let platforms = PlatformRouter::new()
        .with_client(meta.clone())
        .with_client(google.clone())
        .with_client(tiktok.clone());

    let ctx = EngineContext::builder(store.clone(), metrics.clone(), platforms)
        .notifier(Arc::new(LogNotifier))
        .events(Arc::new(TracingSink))
        .savings(estimator_from_config(&config.savings))
        .settings(EngineSettings::from(&config.scheduler))
        .build();

    let registry = Arc::new(RunRegistry::new());
    let scheduler = Arc::new(RuleScheduler::new(ctx.clone(), registry.clone()));
    let rules = Arc::new(RuleService::new(store.clone(), registry, ctx.events.clone()));

    if !cli.no_demo {
        let now = Utc::now();
        demo::seed_entities(
            &demo::DemoClients {
                meta: &meta,
                google: &google,
                tiktok: &tiktok,
            },
            &metrics,
            now,
        );
        demo::seed_rules(&rules, cli.demo_owner.unwrap_or(DEMO_OWNER), now).await?;
    }

    if cli.once {
        let executions = scheduler.run_due(Utc::now()).await?;
        for execution in &executions {
            info!(
                rule_id = %execution.rule_id,
                execution_id = %execution.id,
                status = ?execution.status,
                entities_checked = execution.entities_checked,
                entities_matched = execution.entities_matched,
                actions_taken = execution.actions_taken,
                actions_pending = execution.actions_pending,
                actions_simulated = execution.actions_simulated,
                "Execution finished"
            );
        }
        info!(executions = executions.len(), "Single tick complete");
        return Ok(());
    }

    let state = AppState {
        store: store.clone(),
        rules,
        scheduler: scheduler.clone(),
        approvals: Arc::new(ApprovalService::new(ctx.clone())),
        rollbacks: Arc::new(RollbackManager::new(&ctx)),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
    };
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let shutdown = Arc::new(Notify::new());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    info!("Ad Autopilot is running");

    tokio::select! {
        result = api_server.start_http() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    shutdown.notify_one();
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task panicked");
    }
    info!("Ad Autopilot stopped");
    Ok(())
}
