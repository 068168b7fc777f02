//! Execution recorder — one Execution per run, one ActionHistory row per
//! action attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::error::StoreError;
use autopilot_core::event_bus::{make_event, EngineEventType, EventSink};
use autopilot_core::store::{RuleStore, RunOutcome};
use autopilot_core::types::*;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;

/// Counters accumulated while a run is in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTally {
    pub entities_checked: u32,
    pub entities_matched: u32,
    pub actions_taken: u32,
    pub actions_failed: u32,
    pub actions_pending: u32,
    pub actions_simulated: u32,
    pub actions_skipped: u32,
    pub cost_saved: f64,
}

impl RunTally {
    pub fn apply_to(&self, execution: &mut Execution) {
        execution.entities_checked = self.entities_checked;
        execution.entities_matched = self.entities_matched;
        execution.actions_taken = self.actions_taken;
        execution.actions_failed = self.actions_failed;
        execution.actions_pending = self.actions_pending;
        execution.actions_simulated = self.actions_simulated;
        execution.actions_skipped = self.actions_skipped;
        execution.cost_saved = self.cost_saved;
    }
}

/// How a run ended, before it is written.
#[derive(Debug)]
pub enum RunEnd {
    Completed,
    Cancelled,
    Failed(EngineError),
}

pub struct ExecutionRecorder {
    store: Arc<dyn RuleStore>,
    events: Arc<dyn EventSink>,
    io_timeout: Duration,
}

impl ExecutionRecorder {
    pub fn new(store: Arc<dyn RuleStore>, events: Arc<dyn EventSink>, io_timeout: Duration) -> Self {
        Self {
            store,
            events,
            io_timeout,
        }
    }

    async fn write<T, F>(&self, operation: &'static str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout {
                operation,
                timeout_ms: self.io_timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn start_run(&self, rule: &Rule, now: DateTime<Utc>) -> Result<Execution, EngineError> {
        let execution = Execution::start(rule, now);
        self.write("insert_execution", self.store.insert_execution(execution.clone()))
            .await?;
        self.events.emit(
            make_event(EngineEventType::RunStarted, rule.id).with_execution(execution.id),
        );
        info!(
            rule_id = %rule.id,
            execution_id = %execution.id,
            dry_run = execution.dry_run,
            "Rule run started"
        );
        Ok(execution)
    }

    pub async fn record_action(&self, row: &ActionHistory) -> Result<(), EngineError> {
        self.write("insert_history", self.store.insert_history(row.clone()))
            .await?;
        self.emit_action(row);
        Ok(())
    }

    pub async fn update_action(&self, row: &ActionHistory) -> Result<(), EngineError> {
        self.write("update_history", self.store.update_history(row.clone()))
            .await?;
        self.emit_action(row);
        Ok(())
    }

    /// Cap-skipped actions leave no history row, only an event.
    pub fn record_skip(&self, rule: &Rule, execution_id: Uuid, entity_id: &str, action: ActionType) {
        metrics::counter!("autopilot.actions.skipped", "platform" => rule.platform.as_str())
            .increment(1);
        self.events.emit(
            make_event(EngineEventType::ActionSkipped, rule.id)
                .with_execution(execution_id)
                .with_entity(entity_id)
                .with_detail(format!("{} skipped: daily action limit reached", action)),
        );
    }

    fn emit_action(&self, row: &ActionHistory) {
        let (event_type, metric) = match (row.status, row.dry_run) {
            (ActionStatus::Applied, true) => {
                (EngineEventType::ActionSimulated, "autopilot.actions.simulated")
            }
            (ActionStatus::Applied, false) => (EngineEventType::ActionApplied, "autopilot.actions.applied"),
            (ActionStatus::Pending, _) => (EngineEventType::ActionPending, "autopilot.actions.pending"),
            (ActionStatus::Failed, _) => (EngineEventType::ActionFailed, "autopilot.actions.failed"),
            (ActionStatus::RolledBack, _) => {
                (EngineEventType::ActionRolledBack, "autopilot.actions.rolled_back")
            }
        };
        metrics::counter!(metric, "platform" => row.entity.platform.as_str()).increment(1);
        let mut event = make_event(event_type, row.rule_id)
            .with_execution(row.execution_id)
            .with_history(row.id)
            .with_entity(row.entity.entity_id.clone());
        if let Some(message) = &row.error_message {
            event = event.with_detail(message.clone());
        }
        self.events.emit(event);
    }

    /// Finalizes the execution and writes rule totals and timestamps in one
    /// store call. The next run is scheduled one interval after this run started,
    /// whatever the outcome.
    pub async fn finish_run(
        &self,
        rule: &Rule,
        mut execution: Execution,
        tally: &RunTally,
        end: RunEnd,
        now: DateTime<Utc>,
    ) -> Execution {
        tally.apply_to(&mut execution);
        let (status, failure, event_type) = match &end {
            RunEnd::Completed => (ExecutionStatus::Completed, None, EngineEventType::RunCompleted),
            RunEnd::Cancelled => (ExecutionStatus::Cancelled, None, EngineEventType::RunCancelled),
            RunEnd::Failed(e) => (
                ExecutionStatus::Failed,
                Some((e.to_string(), e.details())),
                EngineEventType::RunFailed,
            ),
        };
        if let Err(e) = execution.finish(status, now, failure) {
            warn!(execution_id = %execution.id, error = %e, "Execution already finalized");
        }

        let outcome = RunOutcome {
            ran_at: execution.started_at,
            next_execution_at: rule.next_run_after(execution.started_at),
            actions_taken: tally.actions_taken,
            cost_saved: tally.cost_saved,
        };
        if let Err(e) = self
            .write("finalize_run", self.store.finalize_run(execution.clone(), outcome))
            .await
        {
            error!(
                rule_id = %rule.id,
                execution_id = %execution.id,
                error = %e,
                "Failed to finalize rule run"
            );
            if let Err(e) = self.store.release_claim(rule.id).await {
                error!(rule_id = %rule.id, error = %e, "Failed to release rule claim");
            }
        }

        metrics::counter!("autopilot.rules.executed", "status" => status_label(status)).increment(1);
        if let Some(ms) = execution.duration_ms {
            metrics::histogram!("autopilot.run.duration_ms").record(ms as f64);
        }

        let mut event = make_event(event_type, rule.id).with_execution(execution.id);
        if let Some(message) = &execution.error_message {
            event = event.with_detail(message.clone());
        }
        self.events.emit(event);

        match &end {
            RunEnd::Failed(e) => warn!(
                rule_id = %rule.id,
                execution_id = %execution.id,
                error = %e,
                "Rule run failed"
            ),
            _ => info!(
                rule_id = %rule.id,
                execution_id = %execution.id,
                status = status_label(status),
                entities_checked = execution.entities_checked,
                entities_matched = execution.entities_matched,
                actions_taken = execution.actions_taken,
                actions_skipped = execution.actions_skipped,
                "Rule run finished"
            ),
        }
        execution
    }
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::event_bus::capture_sink;
    use autopilot_store::InMemoryRuleStore;
    use chrono::Duration as ChronoDuration;

    fn active_rule() -> Rule {
        let mut rule = Rule::new(Uuid::new_v4(), "r", AdPlatform::Meta, EntityType::Campaign);
        rule.status = RuleStatus::Active;
        rule.check_frequency_minutes = 30;
        rule.next_execution_at = Some(Utc::now());
        rule
    }

    #[tokio::test]
    async fn test_failed_run_still_advances_schedule() {
        let store = Arc::new(InMemoryRuleStore::new());
        let sink = capture_sink();
        let recorder = ExecutionRecorder::new(store.clone(), sink.clone(), Duration::from_secs(1));
        let rule = active_rule();
        store.insert_rule(rule.clone()).await.unwrap();

        let started = Utc::now();
        let execution = recorder.start_run(&rule, started).await.unwrap();
        let tally = RunTally {
            entities_checked: 3,
            ..Default::default()
        };
        let finished = recorder
            .finish_run(
                &rule,
                execution,
                &tally,
                RunEnd::Failed(EngineError::Store(StoreError::Unavailable("down".into()))),
                started + ChronoDuration::seconds(2),
            )
            .await;

        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert!(finished.error_message.unwrap().contains("down"));
        assert_eq!(finished.error_details.unwrap()["kind"], "store");
        assert_eq!(finished.entities_checked, 3);

        let stored = store.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.next_execution_at, Some(started + ChronoDuration::minutes(30)));
        assert_eq!(stored.totals.total_executions, 1);
        assert_eq!(sink.count_type(EngineEventType::RunFailed), 1);
    }

    #[tokio::test]
    async fn test_action_events_follow_status() {
        let store = Arc::new(InMemoryRuleStore::new());
        let sink = capture_sink();
        let recorder = ExecutionRecorder::new(store.clone(), sink.clone(), Duration::from_secs(1));
        let rule = active_rule();
        let execution = Execution::start(&rule, Utc::now());
        let entity = EntityRef {
            platform: AdPlatform::Meta,
            entity_type: EntityType::Campaign,
            entity_id: "c-1".into(),
            entity_name: "c".into(),
            account_id: None,
        };
        let mut row = ActionHistory::new(
            &execution,
            &Action::new(0, ActionSpec::Pause),
            entity,
            ActionStatus::Pending,
            Utc::now(),
        );
        recorder.record_action(&row).await.unwrap();
        row.mark_failed("rejected", None);
        recorder.update_action(&row).await.unwrap();

        assert_eq!(sink.count_type(EngineEventType::ActionPending), 1);
        assert_eq!(sink.count_type(EngineEventType::ActionFailed), 1);
        assert_eq!(
            store.get_history(row.id).await.unwrap().status,
            ActionStatus::Failed
        );
    }
}
