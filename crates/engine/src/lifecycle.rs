//! Rule lifecycle — authoring and the draft / active / paused state machine.

use std::sync::Arc;

use autopilot_core::error::StoreError;
use autopilot_core::event_bus::{make_event, EngineEventType, EventSink};
use autopilot_core::store::{RuleStore, StatusChange};
use autopilot_core::types::*;
use autopilot_core::validate_rule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::scheduler::RunRegistry;

const COPY_SUFFIX: &str = " (Copy)";

// ─── State machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCommand {
    Activate,
    Pause,
    Resume,
}

impl RuleCommand {
    fn target(&self) -> RuleStatus {
        match self {
            RuleCommand::Activate | RuleCommand::Resume => RuleStatus::Active,
            RuleCommand::Pause => RuleStatus::Paused,
        }
    }
}

/// Validate that `command` is allowed from `current` and return the target status.
pub fn validate_transition(
    current: RuleStatus,
    command: RuleCommand,
) -> Result<RuleStatus, LifecycleError> {
    match (current, command) {
        (RuleStatus::Draft, RuleCommand::Activate) => Ok(RuleStatus::Active),
        (RuleStatus::Paused, RuleCommand::Activate | RuleCommand::Resume) => Ok(RuleStatus::Active),
        (RuleStatus::Active, RuleCommand::Pause) => Ok(RuleStatus::Paused),
        _ => Err(LifecycleError::InvalidTransition {
            from: current,
            to: command.target(),
        }),
    }
}

/// Moves `rule` to the command's target status and fixes up its schedule.
pub fn apply_transition(
    rule: &mut Rule,
    command: RuleCommand,
    now: DateTime<Utc>,
) -> Result<RuleStatus, LifecycleError> {
    let from = rule.status;
    let to = validate_transition(from, command)?;
    rule.next_execution_at = match (from, to) {
        (RuleStatus::Draft, RuleStatus::Active) => Some(now),
        (_, RuleStatus::Active) => Some(rule.next_run_after(now)),
        _ => None,
    };
    rule.status = to;
    rule.updated_at = now;
    Ok(to)
}

// ─── Definitions ────────────────────────────────────────────────────────────

fn default_frequency() -> u32 {
    60
}

fn default_window() -> u32 {
    7
}

fn empty_metadata() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub position: u32,
    pub metric: MetricType,
    pub operator: Operator,
    pub threshold: f64,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    #[serde(default = "default_window")]
    pub time_window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub position: u32,
    pub action: ActionSpec,
}

/// Author-supplied rule content. Identity, status, schedule and totals are
/// owned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub platform: AdPlatform,
    pub entity_type: EntityType,
    #[serde(default)]
    pub ad_account_id: Option<String>,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default = "default_frequency")]
    pub check_frequency_minutes: u32,
    #[serde(default)]
    pub max_daily_actions: Option<u32>,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
    pub conditions: Vec<ConditionDefinition>,
    pub actions: Vec<ActionDefinition>,
}

impl RuleDefinition {
    /// Overwrites the authored fields of `rule`, minting fresh condition and
    /// action ids.
    pub fn apply_to(&self, rule: &mut Rule) {
        rule.name = self.name.trim().to_string();
        rule.description = self.description.clone();
        rule.platform = self.platform;
        rule.entity_type = self.entity_type;
        rule.ad_account_id = self.ad_account_id.clone();
        rule.combinator = self.combinator;
        rule.check_frequency_minutes = self.check_frequency_minutes;
        rule.max_daily_actions = self.max_daily_actions;
        rule.require_approval = self.require_approval;
        rule.dry_run = self.dry_run;
        rule.metadata = self.metadata.clone();
        rule.conditions = self
            .conditions
            .iter()
            .map(|c| Condition {
                threshold_max: c.threshold_max,
                ..Condition::new(c.position, c.metric, c.operator, c.threshold, c.time_window_days)
            })
            .collect();
        rule.actions = self
            .actions
            .iter()
            .map(|a| Action::new(a.position, a.action.clone()))
            .collect();
    }

    pub fn into_rule(&self, owner_id: Uuid, now: DateTime<Utc>) -> Rule {
        let mut rule = Rule::new(owner_id, self.name.clone(), self.platform, self.entity_type);
        self.apply_to(&mut rule);
        rule.created_at = now;
        rule.updated_at = now;
        rule
    }
}

// ─── Service ────────────────────────────────────────────────────────────────

pub struct RuleService {
    store: Arc<dyn RuleStore>,
    registry: Arc<RunRegistry>,
    events: Arc<dyn EventSink>,
}

impl RuleService {
    pub fn new(store: Arc<dyn RuleStore>, registry: Arc<RunRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            registry,
            events,
        }
    }

    /// Loads a rule the caller owns. Foreign rules read as missing.
    pub async fn get(&self, caller: Uuid, rule_id: Uuid) -> Result<Rule, LifecycleError> {
        match self.store.get_rule(rule_id).await {
            Ok(rule) if rule.owner_id == caller => Ok(rule),
            Ok(_) | Err(StoreError::RuleNotFound(_)) => Err(LifecycleError::NotFound(rule_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, caller: Uuid) -> Result<Vec<Rule>, LifecycleError> {
        Ok(self.store.list_rules(caller).await?)
    }

    /// Validates and stores a new draft rule.
    pub async fn create(
        &self,
        caller: Uuid,
        definition: &RuleDefinition,
        now: DateTime<Utc>,
    ) -> Result<Rule, LifecycleError> {
        let rule = definition.into_rule(caller, now);
        validate_rule(&rule)?;
        self.store.insert_rule(rule.clone()).await?;
        self.events.emit(make_event(EngineEventType::RuleCreated, rule.id));
        info!(rule_id = %rule.id, owner_id = %caller, name = %rule.name, "Rule created");
        Ok(rule)
    }

    /// Replaces the definition. Status, schedule and totals are preserved.
    pub async fn update(
        &self,
        caller: Uuid,
        rule_id: Uuid,
        definition: &RuleDefinition,
        now: DateTime<Utc>,
    ) -> Result<Rule, LifecycleError> {
        let mut rule = self.get(caller, rule_id).await?;
        definition.apply_to(&mut rule);
        validate_rule(&rule)?;
        rule.updated_at = now;
        let rule = self.store.update_definition(&rule).await?;
        info!(rule_id = %rule.id, "Rule updated");
        Ok(rule)
    }

    pub async fn activate(&self, caller: Uuid, rule_id: Uuid, now: DateTime<Utc>) -> Result<Rule, LifecycleError> {
        self.transition(caller, rule_id, RuleCommand::Activate, now).await
    }

    pub async fn resume(&self, caller: Uuid, rule_id: Uuid, now: DateTime<Utc>) -> Result<Rule, LifecycleError> {
        self.transition(caller, rule_id, RuleCommand::Resume, now).await
    }

    /// Pauses the rule and cancels its in-flight run, if any.
    pub async fn pause(&self, caller: Uuid, rule_id: Uuid, now: DateTime<Utc>) -> Result<Rule, LifecycleError> {
        let rule = self.transition(caller, rule_id, RuleCommand::Pause, now).await?;
        if self.registry.cancel(rule_id) {
            info!(rule_id = %rule_id, "In-flight run cancelled by pause");
        }
        Ok(rule)
    }

    async fn transition(
        &self,
        caller: Uuid,
        rule_id: Uuid,
        command: RuleCommand,
        now: DateTime<Utc>,
    ) -> Result<Rule, LifecycleError> {
        let mut rule = self.get(caller, rule_id).await?;
        let from = rule.status;
        if command != RuleCommand::Pause {
            validate_rule(&rule)?;
        }
        let to = apply_transition(&mut rule, command, now)?;
        let change = StatusChange {
            from,
            to,
            next_execution_at: rule.next_execution_at,
            updated_at: now,
        };
        let rule = self.store.set_status(rule_id, change).await?;
        self.events.emit(
            make_event(EngineEventType::RuleStatusChanged, rule_id)
                .with_detail(format!("{:?} -> {:?}", from, to)),
        );
        info!(
            rule_id = %rule_id,
            from = ?from,
            to = ?to,
            next_execution_at = ?rule.next_execution_at,
            "Rule status changed"
        );
        Ok(rule)
    }

    /// Copies a rule into a new draft with fresh ids and zeroed totals.
    pub async fn duplicate(&self, caller: Uuid, rule_id: Uuid, now: DateTime<Utc>) -> Result<Rule, LifecycleError> {
        let source = self.get(caller, rule_id).await?;
        let mut copy = Rule::new(
            caller,
            format!("{}{}", source.name, COPY_SUFFIX),
            source.platform,
            source.entity_type,
        );
        copy.description = source.description.clone();
        copy.ad_account_id = source.ad_account_id.clone();
        copy.combinator = source.combinator;
        copy.check_frequency_minutes = source.check_frequency_minutes;
        copy.max_daily_actions = source.max_daily_actions;
        copy.require_approval = source.require_approval;
        copy.dry_run = source.dry_run;
        copy.metadata = source.metadata.clone();
        copy.conditions = source
            .conditions
            .iter()
            .map(|c| Condition {
                id: Uuid::new_v4(),
                ..c.clone()
            })
            .collect();
        copy.actions = source
            .actions
            .iter()
            .map(|a| Action::new(a.position, a.spec.clone()))
            .collect();
        copy.created_at = now;
        copy.updated_at = now;
        self.store.insert_rule(copy.clone()).await?;
        self.events.emit(make_event(EngineEventType::RuleCreated, copy.id));
        info!(rule_id = %copy.id, source_rule_id = %rule_id, "Rule duplicated");
        Ok(copy)
    }

    /// Deletes the rule. Executions and action history stay in the store.
    pub async fn delete(&self, caller: Uuid, rule_id: Uuid) -> Result<(), LifecycleError> {
        self.get(caller, rule_id).await?;
        self.registry.cancel(rule_id);
        self.store.delete_rule(rule_id).await?;
        self.events.emit(make_event(EngineEventType::RuleDeleted, rule_id));
        info!(rule_id = %rule_id, "Rule deleted");
        Ok(())
    }
}
