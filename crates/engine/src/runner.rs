//! Rule runner — executes one claimed rule against every entity in scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autopilot_core::types::*;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::executor::{ActionExecutor, AppliedChange, TemplateContext};
use crate::guardrails::Decision;
use crate::recorder::{RunEnd, RunTally};

/// Cooperative cancellation flag shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both handles point at the same flag.
    pub fn same_as(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

pub struct RuleRunner {
    ctx: EngineContext,
}

impl RuleRunner {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Runs a claimed rule and finalizes its execution, whatever happens.
    pub async fn run(&self, rule: Rule, cancel: CancelFlag) -> Execution {
        let started = Utc::now();
        let recorder = &self.ctx.recorder;

        let execution = match recorder.start_run(&rule, started).await {
            Ok(execution) => execution,
            Err(e) => {
                let execution = Execution::start(&rule, started);
                return recorder
                    .finish_run(&rule, execution, &RunTally::default(), RunEnd::Failed(e), Utc::now())
                    .await;
            }
        };

        let tally = Arc::new(Mutex::new(RunTally::default()));
        let end = if cancel.is_cancelled() {
            RunEnd::Cancelled
        } else {
            match self.process(&rule, &execution, &cancel, &tally).await {
                Ok(()) if cancel.is_cancelled() => RunEnd::Cancelled,
                Ok(()) => RunEnd::Completed,
                Err(e) => RunEnd::Failed(e),
            }
        };

        let tally = tally.lock().clone();
        recorder
            .finish_run(&rule, execution, &tally, end, Utc::now())
            .await
    }

    async fn process(
        &self,
        rule: &Rule,
        execution: &Execution,
        cancel: &CancelFlag,
        tally: &Arc<Mutex<RunTally>>,
    ) -> Result<(), EngineError> {
        let io_timeout = self.ctx.settings.io_timeout;
        let timeout_ms = io_timeout.as_millis() as u64;
        let client = self.ctx.platforms.client(rule.platform)?;

        let entities = tokio::time::timeout(
            io_timeout,
            client.list_entities(rule.entity_type, rule.ad_account_id.as_deref()),
        )
        .await
        .map_err(|_| EngineError::Timeout {
            operation: "list_entities",
            timeout_ms,
        })??;

        debug!(
            rule_id = %rule.id,
            execution_id = %execution.id,
            entities = entities.len(),
            daily_cap = ?rule.max_daily_actions,
            "Evaluating entities"
        );

        let job = EntityJob {
            ctx: self.ctx.clone(),
            rule: Arc::new(rule.clone()),
            execution: Arc::new(execution.clone()),
            tally: tally.clone(),
        };
        let slots = Arc::new(Semaphore::new(
            self.ctx.settings.max_concurrent_entities_per_rule,
        ));
        let aborted = CancelFlag::new();
        let mut tasks = JoinSet::new();

        for entity in entities {
            if cancel.is_cancelled() || aborted.is_cancelled() {
                break;
            }
            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            if cancel.is_cancelled() || aborted.is_cancelled() {
                break;
            }
            let job = job.clone();
            let aborted = aborted.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = job.process(entity).await;
                if result.is_err() {
                    aborted.cancel();
                }
                result
            });
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(EngineError::Internal(format!("entity task failed: {e}"))));
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Everything one entity task needs, cheaply cloneable.
#[derive(Clone)]
struct EntityJob {
    ctx: EngineContext,
    rule: Arc<Rule>,
    execution: Arc<Execution>,
    tally: Arc<Mutex<RunTally>>,
}

impl EntityJob {
    async fn process(&self, entity: AdEntity) -> Result<(), EngineError> {
        self.tally.lock().entities_checked += 1;

        let evaluation = match self
            .ctx
            .evaluator
            .evaluate(&self.rule, &entity, self.execution.started_at)
            .await
        {
            Ok(evaluation) => evaluation,
            Err(e) if e.is_metric_timeout() => {
                // A slow fetch only costs this entity; source errors still fail the run.
                warn!(
                    rule_id = %self.rule.id,
                    execution_id = %self.execution.id,
                    entity_id = %entity.id,
                    error = %e,
                    "Metric fetch timed out, entity left unmatched"
                );
                metrics::counter!("autopilot.metric_fetch.timeouts").increment(1);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !evaluation.matched {
            return Ok(());
        }
        self.tally.lock().entities_matched += 1;
        let summary = evaluation.summary();

        for action in self.rule.ordered_actions() {
            let template = TemplateContext {
                rule: &self.rule,
                entity: &entity,
                metrics: &summary,
            };
            let decision = tokio::time::timeout(
                self.ctx.settings.io_timeout,
                self.ctx
                    .guardrails
                    .decide(self.ctx.store.as_ref(), &self.rule, Utc::now()),
            )
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "count_applied_since",
                timeout_ms: self.ctx.settings.io_timeout.as_millis() as u64,
            })??;
            match decision {
                Decision::Skip => {
                    self.tally.lock().actions_skipped += 1;
                    self.ctx.recorder.record_skip(
                        &self.rule,
                        self.execution.id,
                        &entity.id,
                        action.action_type(),
                    );
                }
                Decision::Simulate => {
                    let change = ActionExecutor::preview(&action.spec, template);
                    let row = self.row(action, &entity, ActionStatus::Applied, change);
                    self.ctx.recorder.record_action(&row).await?;
                    self.tally.lock().actions_simulated += 1;
                }
                Decision::QueueForApproval => {
                    let mut change = ActionExecutor::preview(&action.spec, template);
                    change.api_response = None;
                    let row = self.row(action, &entity, ActionStatus::Pending, change);
                    self.ctx.recorder.record_action(&row).await?;
                    self.tally.lock().actions_pending += 1;
                }
                Decision::Apply(reservation) => {
                    let row = match self.ctx.executor.apply(&action.spec, template).await {
                        Ok(change) => {
                            let row = self.row(action, &entity, ActionStatus::Applied, change);
                            let saved = self.ctx.savings.estimate(&row, &entity);
                            let mut tally = self.tally.lock();
                            tally.actions_taken += 1;
                            tally.cost_saved += saved;
                            row
                        }
                        Err(e) => {
                            warn!(
                                rule_id = %self.rule.id,
                                execution_id = %self.execution.id,
                                entity_id = %entity.id,
                                action = action.action_type().as_str(),
                                error = %e,
                                "Action failed"
                            );
                            let mut row = ActionHistory::new(
                                &self.execution,
                                action,
                                EntityRef::from(&entity),
                                ActionStatus::Failed,
                                Utc::now(),
                            );
                            row.mark_failed(e.to_string(), Some(e.payload()));
                            self.tally.lock().actions_failed += 1;
                            row
                        }
                    };
                    self.ctx.recorder.record_action(&row).await?;
                    drop(reservation);
                }
            }
        }
        Ok(())
    }

    fn row(
        &self,
        action: &Action,
        entity: &AdEntity,
        status: ActionStatus,
        change: AppliedChange,
    ) -> ActionHistory {
        let mut row = ActionHistory::new(
            &self.execution,
            action,
            EntityRef::from(entity),
            status,
            Utc::now(),
        )
        .with_values(change.old_value, change.new_value);
        row.api_response = change.api_response;
        row
    }
}
