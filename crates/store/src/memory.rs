//! In-memory rule store backed by DashMap.
//!
//! Production: replace with a transactional SQL store exposing the same trait.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use autopilot_core::error::StoreError;
use autopilot_core::store::{RuleStore, RunOutcome, StatusChange};
use autopilot_core::types::*;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Thread-safe store for rules, executions and action history.
pub struct InMemoryRuleStore {
    rules: DashMap<Uuid, Rule>,
    running: DashSet<Uuid>,
    executions: DashMap<Uuid, Execution>,
    history: DashMap<Uuid, ActionHistory>,
    /// Serializes run finalization so execution and rule updates land together.
    finalize_lock: Mutex<()>,
    unavailable: AtomicBool,
    history_writes_failing: AtomicBool,
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        info!("Rule store initialized (in-memory, development mode)");
        Self {
            rules: DashMap::new(),
            running: DashSet::new(),
            executions: DashMap::new(),
            history: DashMap::new(),
            finalize_lock: Mutex::new(()),
            unavailable: AtomicBool::new(false),
            history_writes_failing: AtomicBool::new(false),
        }
    }

    /// Makes every operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes action history inserts and updates fail while other writes succeed.
    pub fn fail_history_writes(&self, failing: bool) {
        self.history_writes_failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_running(&self, rule_id: Uuid) -> bool {
        self.running.contains(&rule_id)
    }

    pub fn history_count(&self) -> usize {
        self.history.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn check_history_writable(&self) -> Result<(), StoreError> {
        self.check_available()?;
        if self.history_writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "action history write rejected".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    // ─── Rules ─────────────────────────────────────────────────────────────

    async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError> {
        self.check_available()?;
        debug!(rule_id = %rule.id, "Rule inserted");
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn update_rule(&self, rule: Rule) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entry = self
            .rules
            .get_mut(&rule.id)
            .ok_or(StoreError::RuleNotFound(rule.id))?;
        *entry = rule;
        Ok(())
    }

    async fn update_definition(&self, rule: &Rule) -> Result<Rule, StoreError> {
        self.check_available()?;
        let mut entry = self
            .rules
            .get_mut(&rule.id)
            .ok_or(StoreError::RuleNotFound(rule.id))?;
        entry.copy_definition_from(rule);
        entry.updated_at = rule.updated_at;
        Ok(entry.value().clone())
    }

    async fn set_status(&self, rule_id: Uuid, change: StatusChange) -> Result<Rule, StoreError> {
        self.check_available()?;
        let mut entry = self
            .rules
            .get_mut(&rule_id)
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        if entry.status != change.from {
            return Err(StoreError::StatusConflict(rule_id));
        }
        entry.status = change.to;
        entry.next_execution_at = change.next_execution_at;
        entry.updated_at = change.updated_at;
        Ok(entry.value().clone())
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Rule, StoreError> {
        self.check_available()?;
        self.rules
            .get(&rule_id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::RuleNotFound(rule_id))
    }

    async fn list_rules(&self, owner_id: Uuid) -> Result<Vec<Rule>, StoreError> {
        self.check_available()?;
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        self.rules
            .remove(&rule_id)
            .map(|_| ())
            .ok_or(StoreError::RuleNotFound(rule_id))
    }

    async fn due_rules(&self, now: DateTime<Utc>) -> Result<Vec<Rule>, StoreError> {
        self.check_available()?;
        let mut due: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.is_due(now))
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| r.next_execution_at);
        Ok(due)
    }

    async fn claim_rule(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Option<Rule>, StoreError> {
        self.check_available()?;
        if !self.running.insert(rule_id) {
            return Ok(None);
        }
        let claimed = self
            .rules
            .get(&rule_id)
            .filter(|r| force || r.is_due(now))
            .map(|r| r.value().clone());
        if claimed.is_none() {
            self.running.remove(&rule_id);
        }
        Ok(claimed)
    }

    async fn release_claim(&self, rule_id: Uuid) -> Result<(), StoreError> {
        self.running.remove(&rule_id);
        Ok(())
    }

    // ─── Executions ────────────────────────────────────────────────────────

    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError> {
        self.check_available()?;
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError> {
        self.check_available()?;
        self.executions
            .get(&execution_id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn list_executions(&self, rule_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        self.check_available()?;
        let mut executions: Vec<Execution> = self
            .executions
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }

    async fn finalize_run(
        &self,
        execution: Execution,
        outcome: RunOutcome,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let _guard = self.finalize_lock.lock();

        if let Some(stored) = self.executions.get(&execution.id) {
            if stored.is_finished() {
                return Err(StoreError::AlreadyFinalized(execution.id));
            }
        }

        let rule_id = execution.rule_id;
        self.executions.insert(execution.id, execution);

        if let Some(mut rule) = self.rules.get_mut(&rule_id) {
            rule.totals.total_executions += 1;
            rule.totals.total_actions_taken += u64::from(outcome.actions_taken);
            rule.totals.total_cost_saved += outcome.cost_saved;
            rule.last_executed_at = Some(outcome.ran_at);
            // A pause during the run already cleared the schedule.
            if rule.status == RuleStatus::Active {
                rule.next_execution_at = Some(outcome.next_execution_at);
            }
        }
        self.running.remove(&rule_id);
        Ok(())
    }

    // ─── Action history ────────────────────────────────────────────────────

    async fn insert_history(&self, row: ActionHistory) -> Result<(), StoreError> {
        self.check_history_writable()?;
        self.history.insert(row.id, row);
        Ok(())
    }

    async fn update_history(&self, row: ActionHistory) -> Result<(), StoreError> {
        self.check_history_writable()?;
        let mut entry = self
            .history
            .get_mut(&row.id)
            .ok_or(StoreError::HistoryNotFound(row.id))?;
        *entry = row;
        Ok(())
    }

    async fn get_history(&self, history_id: Uuid) -> Result<ActionHistory, StoreError> {
        self.check_available()?;
        self.history
            .get(&history_id)
            .map(|h| h.value().clone())
            .ok_or(StoreError::HistoryNotFound(history_id))
    }

    async fn list_history(&self, rule_id: Uuid) -> Result<Vec<ActionHistory>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<ActionHistory> = self
            .history
            .iter()
            .filter(|h| h.rule_id == rule_id)
            .map(|h| h.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_applied_since(
        &self,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        self.check_available()?;
        let count = self
            .history
            .iter()
            .filter(|h| h.rule_id == rule_id)
            .filter(|h| h.status == ActionStatus::Applied && !h.dry_run)
            .filter(|h| h.applied_at.map(|at| at >= since).unwrap_or(false))
            .count();
        Ok(count as u32)
    }

    async fn pending_approvals(&self, owner_id: Uuid) -> Result<Vec<ActionHistory>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<ActionHistory> = self
            .history
            .iter()
            .filter(|h| h.owner_id == owner_id && h.status == ActionStatus::Pending)
            .map(|h| h.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active_rule(next: DateTime<Utc>) -> Rule {
        let mut rule = Rule::new(Uuid::new_v4(), "Scale winners", AdPlatform::Meta, EntityType::Campaign);
        rule.status = RuleStatus::Active;
        rule.next_execution_at = Some(next);
        rule.conditions = vec![Condition::new(0, MetricType::Roas, Operator::GreaterThan, 3.0, 7)];
        rule.actions = vec![Action::new(0, ActionSpec::Pause)];
        rule
    }

    fn entity_ref() -> EntityRef {
        EntityRef {
            platform: AdPlatform::Meta,
            entity_type: EntityType::Campaign,
            entity_id: "c-1".into(),
            entity_name: "Campaign".into(),
            account_id: None,
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_finalized() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now - Duration::minutes(1));
        let rule_id = rule.id;
        store.insert_rule(rule.clone()).await.unwrap();

        assert!(store.claim_rule(rule_id, now, false).await.unwrap().is_some());
        assert!(store.claim_rule(rule_id, now, false).await.unwrap().is_none());
        assert!(store.is_running(rule_id));

        let mut execution = Execution::start(&rule, now);
        store.insert_execution(execution.clone()).await.unwrap();
        execution.finish(ExecutionStatus::Completed, now, None).unwrap();
        store
            .finalize_run(
                execution,
                RunOutcome {
                    ran_at: now,
                    next_execution_at: now + Duration::minutes(60),
                    actions_taken: 2,
                    cost_saved: 12.5,
                },
            )
            .await
            .unwrap();

        assert!(!store.is_running(rule_id));
        let stored = store.get_rule(rule_id).await.unwrap();
        assert_eq!(stored.totals.total_executions, 1);
        assert_eq!(stored.totals.total_actions_taken, 2);
        assert_eq!(stored.next_execution_at, Some(now + Duration::minutes(60)));
        assert!(!stored.is_due(now));
        assert!(store.claim_rule(rule_id, now, false).await.unwrap().is_none());
        assert!(store.claim_rule(rule_id, now, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finalize_twice_rejected() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        store.insert_rule(rule.clone()).await.unwrap();

        let mut execution = Execution::start(&rule, now);
        store.insert_execution(execution.clone()).await.unwrap();
        execution.finish(ExecutionStatus::Failed, now, None).unwrap();
        let outcome = RunOutcome {
            ran_at: now,
            next_execution_at: now,
            actions_taken: 0,
            cost_saved: 0.0,
        };
        store.finalize_run(execution.clone(), outcome.clone()).await.unwrap();
        assert_eq!(
            store.finalize_run(execution.clone(), outcome).await,
            Err(StoreError::AlreadyFinalized(execution.id))
        );
        assert_eq!(store.get_rule(rule.id).await.unwrap().totals.total_executions, 1);
    }

    #[tokio::test]
    async fn test_stale_definition_write_keeps_run_fields() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        store.insert_rule(rule.clone()).await.unwrap();
        let stale = rule.clone();

        let mut execution = Execution::start(&rule, now);
        execution.finish(ExecutionStatus::Completed, now, None).unwrap();
        let next = now + Duration::minutes(60);
        store
            .finalize_run(
                execution,
                RunOutcome {
                    ran_at: now,
                    next_execution_at: next,
                    actions_taken: 3,
                    cost_saved: 12.5,
                },
            )
            .await
            .unwrap();

        let mut edited = stale;
        edited.name = "Scale big winners".into();
        edited.max_daily_actions = Some(4);
        edited.updated_at = now + Duration::seconds(1);
        let merged = store.update_definition(&edited).await.unwrap();

        assert_eq!(merged.name, "Scale big winners");
        assert_eq!(merged.max_daily_actions, Some(4));
        assert_eq!(merged.totals.total_executions, 1);
        assert_eq!(merged.totals.total_actions_taken, 3);
        assert_eq!(merged.last_executed_at, Some(now));
        assert_eq!(merged.next_execution_at, Some(next));
        assert_eq!(store.get_rule(rule.id).await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_set_status_checks_expected_status() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let mut rule = active_rule(now);
        rule.totals.total_executions = 7;
        rule.last_executed_at = Some(now - Duration::hours(1));
        store.insert_rule(rule.clone()).await.unwrap();

        let pause = StatusChange {
            from: RuleStatus::Active,
            to: RuleStatus::Paused,
            next_execution_at: None,
            updated_at: now,
        };
        let paused = store.set_status(rule.id, pause.clone()).await.unwrap();
        assert_eq!(paused.status, RuleStatus::Paused);
        assert_eq!(paused.next_execution_at, None);
        assert_eq!(paused.totals.total_executions, 7);
        assert_eq!(paused.last_executed_at, rule.last_executed_at);

        assert_eq!(
            store.set_status(rule.id, pause).await.unwrap_err(),
            StoreError::StatusConflict(rule.id)
        );
    }

    #[tokio::test]
    async fn test_finalize_keeps_paused_schedule_cleared() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        store.insert_rule(rule.clone()).await.unwrap();

        let mut paused = rule.clone();
        paused.status = RuleStatus::Paused;
        paused.next_execution_at = None;
        store.update_rule(paused).await.unwrap();

        let mut execution = Execution::start(&rule, now);
        execution.finish(ExecutionStatus::Cancelled, now, None).unwrap();
        store
            .finalize_run(
                execution,
                RunOutcome {
                    ran_at: now,
                    next_execution_at: now + Duration::minutes(5),
                    actions_taken: 0,
                    cost_saved: 0.0,
                },
            )
            .await
            .unwrap();
        let stored = store.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.status, RuleStatus::Paused);
        assert_eq!(stored.next_execution_at, None);
        assert_eq!(stored.last_executed_at, Some(now));
    }

    #[tokio::test]
    async fn test_count_applied_excludes_dry_run_and_old_rows() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        let execution = Execution::start(&rule, now);
        let action = Action::new(0, ActionSpec::Pause);

        let fresh = ActionHistory::new(&execution, &action, entity_ref(), ActionStatus::Applied, now);
        let mut old = ActionHistory::new(&execution, &action, entity_ref(), ActionStatus::Applied, now);
        old.applied_at = Some(now - Duration::hours(30));
        let mut simulated = ActionHistory::new(&execution, &action, entity_ref(), ActionStatus::Applied, now);
        simulated.dry_run = true;
        let pending = ActionHistory::new(&execution, &action, entity_ref(), ActionStatus::Pending, now);

        for row in [fresh, old, simulated, pending.clone()] {
            store.insert_history(row).await.unwrap();
        }

        let since = now - Duration::hours(24);
        assert_eq!(store.count_applied_since(rule.id, since).await.unwrap(), 1);
        let approvals = store.pending_approvals(rule.owner_id).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_delete_rule_keeps_history() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        store.insert_rule(rule.clone()).await.unwrap();
        let execution = Execution::start(&rule, now);
        let row = ActionHistory::new(
            &execution,
            &Action::new(0, ActionSpec::Pause),
            entity_ref(),
            ActionStatus::Applied,
            now,
        );
        store.insert_history(row.clone()).await.unwrap();

        store.delete_rule(rule.id).await.unwrap();
        assert!(store.get_rule(rule.id).await.is_err());
        assert_eq!(store.get_history(row.id).await.unwrap().rule_id, rule.id);
        assert_eq!(store.list_history(rule.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryRuleStore::new();
        let now = Utc::now();
        let rule = active_rule(now);
        store.insert_rule(rule.clone()).await.unwrap();

        store.fail_history_writes(true);
        let execution = Execution::start(&rule, now);
        let row = ActionHistory::new(
            &execution,
            &Action::new(0, ActionSpec::Pause),
            entity_ref(),
            ActionStatus::Applied,
            now,
        );
        assert!(store.insert_history(row).await.is_err());
        assert!(store.get_rule(rule.id).await.is_ok());

        store.set_unavailable(true);
        assert!(matches!(
            store.get_rule(rule.id).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
