//! Rule scheduler — control loop that finds due rules and runs them with
//! bounded concurrency.

use std::sync::Arc;

use autopilot_core::error::StoreError;
use autopilot_core::types::{Execution, Rule, RuleStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::error::{EngineError, LifecycleError};
use crate::runner::{CancelFlag, RuleRunner};

/// Cancel flags of in-flight runs, keyed by rule.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<Uuid, CancelFlag>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, rule_id: Uuid) -> CancelFlag {
        let flag = CancelFlag::new();
        self.runs.insert(rule_id, flag.clone());
        flag
    }

    /// Flips the cancel flag of the rule's in-flight run, if any.
    pub fn cancel(&self, rule_id: Uuid) -> bool {
        match self.runs.get(&rule_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the entry only if it still belongs to this run.
    pub fn finish(&self, rule_id: Uuid, flag: &CancelFlag) {
        self.runs.remove_if(&rule_id, |_, current| current.same_as(flag));
    }

    pub fn is_running(&self, rule_id: Uuid) -> bool {
        self.runs.contains_key(&rule_id)
    }

    pub fn running(&self) -> usize {
        self.runs.len()
    }
}

pub struct RuleScheduler {
    ctx: EngineContext,
    runner: Arc<RuleRunner>,
    registry: Arc<RunRegistry>,
    rule_slots: Arc<Semaphore>,
}

impl RuleScheduler {
    pub fn new(ctx: EngineContext, registry: Arc<RunRegistry>) -> Self {
        let rule_slots = Arc::new(Semaphore::new(ctx.settings.max_concurrent_rules));
        Self {
            runner: Arc::new(RuleRunner::new(ctx.clone())),
            ctx,
            registry,
            rule_slots,
        }
    }

    pub fn registry(&self) -> Arc<RunRegistry> {
        self.registry.clone()
    }

    /// Claims every due rule and spawns its run. Rules whose claim is lost
    /// (already running, no longer due) are skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<Execution>>, EngineError> {
        let io_timeout = self.ctx.settings.io_timeout;
        let due = tokio::time::timeout(io_timeout, self.ctx.store.due_rules(now))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "due_rules",
                timeout_ms: io_timeout.as_millis() as u64,
            })??;

        let mut handles = Vec::with_capacity(due.len());
        for rule in due {
            match self.ctx.store.claim_rule(rule.id, now, false).await {
                Ok(Some(claimed)) => handles.push(self.spawn_run(claimed)),
                Ok(None) => debug!(rule_id = %rule.id, "Rule claim lost"),
                Err(e) => warn!(rule_id = %rule.id, error = %e, "Rule claim failed"),
            }
        }

        metrics::counter!("autopilot.scheduler.ticks").increment(1);
        metrics::counter!("autopilot.scheduler.dispatched").increment(handles.len() as u64);
        if !handles.is_empty() {
            info!(dispatched = handles.len(), "Scheduler tick dispatched rule runs");
        }
        Ok(handles)
    }

    /// Runs one tick and waits for every run it dispatched.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<Execution>, EngineError> {
        let handles = self.tick(now).await?;
        let mut executions = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(execution) => executions.push(execution),
                Err(e) => warn!(error = %e, "Rule run task failed"),
            }
        }
        Ok(executions)
    }

    /// Runs an active or paused rule immediately, outside its schedule.
    pub async fn run_now(&self, rule_id: Uuid, caller: Uuid) -> Result<Execution, LifecycleError> {
        let rule = self.ctx.store.get_rule(rule_id).await.map_err(|e| match e {
            StoreError::RuleNotFound(id) => LifecycleError::NotFound(id),
            other => LifecycleError::Store(other),
        })?;
        if rule.owner_id != caller {
            return Err(LifecycleError::NotFound(rule_id));
        }
        if rule.status == RuleStatus::Draft {
            return Err(LifecycleError::InvalidTransition {
                from: RuleStatus::Draft,
                to: RuleStatus::Active,
            });
        }
        let claimed = self
            .ctx
            .store
            .claim_rule(rule_id, Utc::now(), true)
            .await?
            .ok_or(LifecycleError::AlreadyRunning(rule_id))?;

        info!(rule_id = %rule_id, "Manual rule run requested");
        let cancel = self.registry.register(rule_id);
        let _permit = self.rule_slots.clone().acquire_owned().await.ok();
        let execution = self.runner.run(claimed, cancel.clone()).await;
        self.registry.finish(rule_id, &cancel);
        Ok(execution)
    }

    fn spawn_run(&self, rule: Rule) -> JoinHandle<Execution> {
        let cancel = self.registry.register(rule.id);
        let runner = self.runner.clone();
        let registry = self.registry.clone();
        let slots = self.rule_slots.clone();
        tokio::spawn(async move {
            let _permit = slots.acquire_owned().await.ok();
            let rule_id = rule.id;
            let execution = runner.run(rule, cancel.clone()).await;
            registry.finish(rule_id, &cancel);
            execution
        })
    }

    /// Ticks at the configured interval until `shutdown` is notified, then
    /// waits for in-flight runs to finalize.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.ctx.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inflight: Vec<JoinHandle<Execution>> = Vec::new();

        info!(
            tick_secs = self.ctx.settings.tick_interval.as_secs(),
            max_concurrent_rules = self.ctx.settings.max_concurrent_rules,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = interval.tick() => {
                    inflight.retain(|h| !h.is_finished());
                    match self.tick(Utc::now()).await {
                        Ok(handles) => inflight.extend(handles),
                        Err(e) => warn!(error = %e, "Scheduler tick failed"),
                    }
                }
            }
        }

        info!(inflight = inflight.len(), "Scheduler stopping, draining in-flight runs");
        for handle in inflight {
            if let Err(e) = handle.await {
                warn!(error = %e, "Rule run task failed during shutdown");
            }
        }
    }
}
