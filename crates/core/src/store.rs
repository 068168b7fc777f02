//! Rule persistence collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{ActionHistory, Execution, Rule, RuleStatus};

/// Rule-side effects written together with an execution's finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub ran_at: DateTime<Utc>,
    /// Applied only while the rule is still active.
    pub next_execution_at: DateTime<Utc>,
    pub actions_taken: u32,
    pub cost_saved: f64,
}

/// A lifecycle move written by [`RuleStore::set_status`]. Applied only while
/// the stored status still equals `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub from: RuleStatus,
    pub to: RuleStatus,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for rules, executions and the action audit trail.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError>;

    /// Replaces a stored rule wholesale.
    async fn update_rule(&self, rule: Rule) -> Result<(), StoreError>;

    /// Writes the authored fields of `rule` (see [`Rule::copy_definition_from`])
    /// and `updated_at`. Status, schedule and totals keep their stored values.
    /// Returns the merged row.
    async fn update_definition(&self, rule: &Rule) -> Result<Rule, StoreError>;

    /// Writes status, `next_execution_at` and `updated_at` only. Fails with
    /// [`StoreError::StatusConflict`] when the stored status is no longer
    /// `change.from`. Returns the merged row.
    async fn set_status(&self, rule_id: Uuid, change: StatusChange) -> Result<Rule, StoreError>;

    async fn get_rule(&self, rule_id: Uuid) -> Result<Rule, StoreError>;

    async fn list_rules(&self, owner_id: Uuid) -> Result<Vec<Rule>, StoreError>;

    /// Removes the rule; executions and history referencing it stay readable.
    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StoreError>;

    /// Active rules whose `next_execution_at` is at or before `now`.
    async fn due_rules(&self, now: DateTime<Utc>) -> Result<Vec<Rule>, StoreError>;

    /// Compare-and-swap claim. Succeeds only when the rule is not already
    /// running and is due at `now` (or `force` is set, for manual runs).
    /// Returns the claimed snapshot, or `None` when the claim was lost.
    async fn claim_rule(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Option<Rule>, StoreError>;

    /// Drops a claim without finalizing a run.
    async fn release_claim(&self, rule_id: Uuid) -> Result<(), StoreError>;

    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError>;

    /// Most recent first.
    async fn list_executions(&self, rule_id: Uuid) -> Result<Vec<Execution>, StoreError>;

    /// Atomically stores the terminal execution, updates rule totals and
    /// timestamps, and releases the claim. Fails if the stored execution is
    /// already finalized.
    async fn finalize_run(&self, execution: Execution, outcome: RunOutcome)
        -> Result<(), StoreError>;

    async fn insert_history(&self, row: ActionHistory) -> Result<(), StoreError>;

    async fn update_history(&self, row: ActionHistory) -> Result<(), StoreError>;

    async fn get_history(&self, history_id: Uuid) -> Result<ActionHistory, StoreError>;

    /// Most recent first.
    async fn list_history(&self, rule_id: Uuid) -> Result<Vec<ActionHistory>, StoreError>;

    /// Applied, non-dry-run rows for the rule with `applied_at >= since`.
    async fn count_applied_since(
        &self,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Pending rows awaiting approval, oldest first.
    async fn pending_approvals(&self, owner_id: Uuid) -> Result<Vec<ActionHistory>, StoreError>;
}
