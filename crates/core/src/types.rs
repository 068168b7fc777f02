use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AutopilotError, AutopilotResult};

// ─── Platforms & Entities ───────────────────────────────────────────────────

/// Advertising platform a rule operates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdPlatform {
    Meta,
    Google,
    Tiktok,
}

impl AdPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdPlatform::Meta => "meta",
            AdPlatform::Google => "google",
            AdPlatform::Tiktok => "tiktok",
        }
    }

    pub fn all() -> [AdPlatform; 3] {
        [AdPlatform::Meta, AdPlatform::Google, AdPlatform::Tiktok]
    }
}

impl fmt::Display for AdPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of the advertising hierarchy a rule is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    AdSet,
    Ad,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaign",
            EntityType::AdSet => "ad_set",
            EntityType::Ad => "ad",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an entity on its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Paused,
    Archived,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Paused => "paused",
            EntityStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an advertising entity as reported by its platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdEntity {
    /// Platform-native identifier.
    pub id: String,
    pub name: String,
    pub platform: AdPlatform,
    pub entity_type: EntityType,
    #[serde(default)]
    pub account_id: Option<String>,
    pub status: EntityStatus,
    #[serde(default)]
    pub daily_budget: Option<f64>,
    #[serde(default)]
    pub bid_amount: Option<f64>,
    #[serde(default)]
    pub bid_cap: Option<f64>,
}

/// Identifies the entity an action was applied to, with a cached display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub platform: AdPlatform,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: String,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl From<&AdEntity> for EntityRef {
    fn from(entity: &AdEntity) -> Self {
        Self {
            platform: entity.platform,
            entity_type: entity.entity_type,
            entity_id: entity.id.clone(),
            entity_name: entity.name.clone(),
            account_id: entity.account_id.clone(),
        }
    }
}

// ─── Rules ──────────────────────────────────────────────────────────────────

/// Lifecycle status of a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Draft,
    Active,
    Paused,
}

/// How per-condition results combine into the rule outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Running totals maintained by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTotals {
    pub total_executions: u64,
    pub total_actions_taken: u64,
    pub total_cost_saved: f64,
}

/// A user-authored automation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub platform: AdPlatform,
    #[serde(default)]
    pub status: RuleStatus,
    pub entity_type: EntityType,
    /// Restricts the rule to one advertising account when set.
    #[serde(default)]
    pub ad_account_id: Option<String>,
    #[serde(default)]
    pub combinator: Combinator,
    pub check_frequency_minutes: u32,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    /// Maximum applied actions per rolling 24 hours. `None` is unlimited.
    #[serde(default)]
    pub max_daily_actions: Option<u32>,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub totals: RuleTotals,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Creates an empty draft rule checked hourly.
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        platform: AdPlatform,
        entity_type: EntityType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            description: None,
            platform,
            status: RuleStatus::Draft,
            entity_type,
            ad_account_id: None,
            combinator: Combinator::And,
            check_frequency_minutes: 60,
            last_executed_at: None,
            next_execution_at: None,
            max_daily_actions: None,
            require_approval: false,
            dry_run: false,
            totals: RuleTotals::default(),
            metadata: serde_json::json!({}),
            conditions: Vec::new(),
            actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RuleStatus::Active
            && self.next_execution_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Copies the author-owned fields of `other`. Identity, owner, status,
    /// schedule and totals are left untouched.
    pub fn copy_definition_from(&mut self, other: &Rule) {
        self.name = other.name.clone();
        self.description = other.description.clone();
        self.platform = other.platform;
        self.entity_type = other.entity_type;
        self.ad_account_id = other.ad_account_id.clone();
        self.combinator = other.combinator;
        self.check_frequency_minutes = other.check_frequency_minutes;
        self.max_daily_actions = other.max_daily_actions;
        self.require_approval = other.require_approval;
        self.dry_run = other.dry_run;
        self.metadata = other.metadata.clone();
        self.conditions = other.conditions.clone();
        self.actions = other.actions.clone();
    }

    /// Next run time counted from `from`.
    pub fn next_run_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::minutes(i64::from(self.check_frequency_minutes))
    }

    /// Conditions in ascending ordinal position.
    pub fn ordered_conditions(&self) -> Vec<&Condition> {
        let mut conditions: Vec<&Condition> = self.conditions.iter().collect();
        conditions.sort_by_key(|c| c.position);
        conditions
    }

    /// Actions in ascending ordinal position.
    pub fn ordered_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().collect();
        actions.sort_by_key(|a| a.position);
        actions
    }
}

// ─── Conditions ─────────────────────────────────────────────────────────────

/// Metrics a condition can compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Profit,
    ProfitMargin,
    Roas,
    Cpa,
    Cpc,
    Cpm,
    Ctr,
    Spend,
    Revenue,
    Conversions,
    Clicks,
    Impressions,
    Frequency,
    ConversionRate,
    /// Google Ads keyword quality score (1-10).
    QualityScore,
    /// Google Ads search impression share, percent.
    SearchImpressionShare,
    /// TikTok / Meta video view rate, percent.
    VideoViewRate,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Profit => "profit",
            MetricType::ProfitMargin => "profit_margin",
            MetricType::Roas => "roas",
            MetricType::Cpa => "cpa",
            MetricType::Cpc => "cpc",
            MetricType::Cpm => "cpm",
            MetricType::Ctr => "ctr",
            MetricType::Spend => "spend",
            MetricType::Revenue => "revenue",
            MetricType::Conversions => "conversions",
            MetricType::Clicks => "clicks",
            MetricType::Impressions => "impressions",
            MetricType::Frequency => "frequency",
            MetricType::ConversionRate => "conversion_rate",
            MetricType::QualityScore => "quality_score",
            MetricType::SearchImpressionShare => "search_impression_share",
            MetricType::VideoViewRate => "video_view_rate",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "<", alias = "less_than")]
    LessThan,
    #[serde(rename = "=", alias = "equals")]
    Equals,
    #[serde(rename = ">=", alias = "greater_or_equal")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "less_or_equal")]
    LessOrEqual,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "!=", alias = "not_equals")]
    NotEquals,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::Equals => "=",
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Between => "between",
            Operator::NotEquals => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single metric / operator / threshold / window comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: Uuid,
    pub position: u32,
    pub metric: MetricType,
    pub operator: Operator,
    pub threshold: f64,
    /// Upper bound, only read by [`Operator::Between`].
    #[serde(default)]
    pub threshold_max: Option<f64>,
    pub time_window_days: u32,
}

impl Condition {
    pub fn new(
        position: u32,
        metric: MetricType,
        operator: Operator,
        threshold: f64,
        time_window_days: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            metric,
            operator,
            threshold,
            threshold_max: None,
            time_window_days,
        }
    }

    pub fn between(position: u32, metric: MetricType, min: f64, max: f64, days: u32) -> Self {
        Self {
            threshold_max: Some(max),
            ..Self::new(position, metric, Operator::Between, min, days)
        }
    }
}

// ─── Actions ────────────────────────────────────────────────────────────────

/// How a budget change value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Percent,
    FixedAmount,
}

/// Parameters of a budget adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetChange {
    pub change_type: ChangeType,
    /// Signed: positive scales up, negative scales down.
    pub change_value: f64,
    #[serde(default)]
    pub min_budget: Option<f64>,
    #[serde(default)]
    pub max_budget: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Slack,
    Sms,
    InApp,
    Webhook,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Slack => "slack",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
            NotificationChannel::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMatchType {
    Exact,
    Phrase,
    Broad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiddingStrategy {
    LowestCost,
    CostCap,
    BidCap,
    TargetCpa,
    TargetRoas,
    MaximizeConversions,
    MaximizeConversionValue,
    ManualCpc,
}

impl BiddingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiddingStrategy::LowestCost => "lowest_cost",
            BiddingStrategy::CostCap => "cost_cap",
            BiddingStrategy::BidCap => "bid_cap",
            BiddingStrategy::TargetCpa => "target_cpa",
            BiddingStrategy::TargetRoas => "target_roas",
            BiddingStrategy::MaximizeConversions => "maximize_conversions",
            BiddingStrategy::MaximizeConversionValue => "maximize_conversion_value",
            BiddingStrategy::ManualCpc => "manual_cpc",
        }
    }

    /// Strategies that need a numeric target to be meaningful.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            BiddingStrategy::CostCap
                | BiddingStrategy::BidCap
                | BiddingStrategy::TargetCpa
                | BiddingStrategy::TargetRoas
        )
    }
}

/// Typed parameters of an action, one variant per action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Pause,
    Resume,
    AdjustBudget(BudgetChange),
    ChangeBid {
        bid_amount: f64,
    },
    ChangeStatus {
        target_status: EntityStatus,
    },
    DuplicateWinner {
        #[serde(default)]
        name_suffix: Option<String>,
        #[serde(default)]
        budget_multiplier: Option<f64>,
    },
    SendNotification {
        channels: Vec<NotificationChannel>,
        #[serde(default)]
        message_template: Option<String>,
    },
    /// Meta only.
    SetBidCap {
        amount: f64,
    },
    /// Google only.
    AddNegativeKeyword {
        keyword: String,
        match_type: KeywordMatchType,
    },
    ExcludePlacement {
        placement: String,
    },
    ChangeBiddingStrategy {
        strategy: BiddingStrategy,
        #[serde(default)]
        target: Option<f64>,
    },
}

impl ActionSpec {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionSpec::Pause => ActionType::Pause,
            ActionSpec::Resume => ActionType::Resume,
            ActionSpec::AdjustBudget(_) => ActionType::AdjustBudget,
            ActionSpec::ChangeBid { .. } => ActionType::ChangeBid,
            ActionSpec::ChangeStatus { .. } => ActionType::ChangeStatus,
            ActionSpec::DuplicateWinner { .. } => ActionType::DuplicateWinner,
            ActionSpec::SendNotification { .. } => ActionType::SendNotification,
            ActionSpec::SetBidCap { .. } => ActionType::SetBidCap,
            ActionSpec::AddNegativeKeyword { .. } => ActionType::AddNegativeKeyword,
            ActionSpec::ExcludePlacement { .. } => ActionType::ExcludePlacement,
            ActionSpec::ChangeBiddingStrategy { .. } => ActionType::ChangeBiddingStrategy,
        }
    }
}

/// Discriminant of [`ActionSpec`], stored on audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Pause,
    Resume,
    AdjustBudget,
    ChangeBid,
    ChangeStatus,
    DuplicateWinner,
    SendNotification,
    SetBidCap,
    AddNegativeKeyword,
    ExcludePlacement,
    ChangeBiddingStrategy,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Pause => "pause",
            ActionType::Resume => "resume",
            ActionType::AdjustBudget => "adjust_budget",
            ActionType::ChangeBid => "change_bid",
            ActionType::ChangeStatus => "change_status",
            ActionType::DuplicateWinner => "duplicate_winner",
            ActionType::SendNotification => "send_notification",
            ActionType::SetBidCap => "set_bid_cap",
            ActionType::AddNegativeKeyword => "add_negative_keyword",
            ActionType::ExcludePlacement => "exclude_placement",
            ActionType::ChangeBiddingStrategy => "change_bidding_strategy",
        }
    }

    /// Whether an applied action of this type can later be rolled back.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            ActionType::Pause
                | ActionType::Resume
                | ActionType::ChangeStatus
                | ActionType::AdjustBudget
                | ActionType::ChangeBid
                | ActionType::SetBidCap
        )
    }

    pub fn supported_on(&self, platform: AdPlatform) -> bool {
        match self {
            ActionType::SetBidCap => platform == AdPlatform::Meta,
            ActionType::AddNegativeKeyword => platform == AdPlatform::Google,
            ActionType::ExcludePlacement => {
                matches!(platform, AdPlatform::Google | AdPlatform::Meta)
            }
            _ => true,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single effect to apply to a matched entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub position: u32,
    pub spec: ActionSpec,
}

impl Action {
    pub fn new(position: u32, spec: ActionSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            spec,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.spec.action_type()
    }
}

// ─── Executions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One scheduler run of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub owner_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entities_checked: u32,
    pub entities_matched: u32,
    pub actions_taken: u32,
    pub actions_failed: u32,
    pub actions_pending: u32,
    pub actions_simulated: u32,
    /// Matched but not acted: candidates dropped by the daily cap.
    pub actions_skipped: u32,
    pub duration_ms: Option<u64>,
    pub cost_saved: f64,
    pub dry_run: bool,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

impl Execution {
    pub fn start(rule: &Rule, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            owner_id: rule.owner_id,
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            entities_checked: 0,
            entities_matched: 0,
            actions_taken: 0,
            actions_failed: 0,
            actions_pending: 0,
            actions_simulated: 0,
            actions_skipped: 0,
            duration_ms: None,
            cost_saved: 0.0,
            dry_run: rule.dry_run,
            error_message: None,
            error_details: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    /// Moves a running execution to a terminal status. Executions are never
    /// re-opened, so finishing twice is an error.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        now: DateTime<Utc>,
        error: Option<(String, serde_json::Value)>,
    ) -> AutopilotResult<()> {
        if self.is_finished() {
            return Err(AutopilotError::InvalidState(format!(
                "execution {} already finalized as {:?}",
                self.id, self.status
            )));
        }
        if status == ExecutionStatus::Running {
            return Err(AutopilotError::InvalidState(
                "cannot finalize an execution as running".to_string(),
            ));
        }
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        if let Some((message, details)) = error {
            self.error_message = Some(message);
            self.error_details = Some(details);
        }
        Ok(())
    }
}

// ─── Action History ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Applied,
    Failed,
    RolledBack,
}

/// Entity attribute touched by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionField {
    Status,
    DailyBudget,
    Bid,
    BidCap,
    NegativeKeywords,
    Placements,
    BiddingStrategy,
    Duplicate,
    Notification,
}

impl ActionField {
    pub fn for_action(action: &ActionSpec) -> Self {
        match action {
            ActionSpec::Pause | ActionSpec::Resume | ActionSpec::ChangeStatus { .. } => {
                ActionField::Status
            }
            ActionSpec::AdjustBudget(_) => ActionField::DailyBudget,
            ActionSpec::ChangeBid { .. } => ActionField::Bid,
            ActionSpec::SetBidCap { .. } => ActionField::BidCap,
            ActionSpec::AddNegativeKeyword { .. } => ActionField::NegativeKeywords,
            ActionSpec::ExcludePlacement { .. } => ActionField::Placements,
            ActionSpec::ChangeBiddingStrategy { .. } => ActionField::BiddingStrategy,
            ActionSpec::DuplicateWinner { .. } => ActionField::Duplicate,
            ActionSpec::SendNotification { .. } => ActionField::Notification,
        }
    }
}

/// Old or new value of a changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Status(EntityStatus),
    Amount(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Status(status) => write!(f, "{}", status),
            FieldValue::Amount(amount) => write!(f, "{:.2}", amount),
            FieldValue::Text(text) => f.write_str(text),
        }
    }
}

/// Audit record of one attempted action application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistory {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub rule_id: Uuid,
    pub owner_id: Uuid,
    pub action_id: Uuid,
    pub action_type: ActionType,
    /// Snapshot of the action so a pending approval can be applied later.
    pub action: ActionSpec,
    pub entity: EntityRef,
    pub field_changed: ActionField,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub status: ActionStatus,
    pub api_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub can_rollback: bool,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub rollback_reason: Option<String>,
}

impl ActionHistory {
    pub fn new(
        execution: &Execution,
        action: &Action,
        entity: EntityRef,
        status: ActionStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let action_type = action.action_type();
        Self {
            id: Uuid::new_v4(),
            execution_id: execution.id,
            rule_id: execution.rule_id,
            owner_id: execution.owner_id,
            action_id: action.id,
            action_type,
            action: action.spec.clone(),
            entity,
            field_changed: ActionField::for_action(&action.spec),
            old_value: None,
            new_value: None,
            status,
            api_response: None,
            error_message: None,
            can_rollback: action_type.is_reversible(),
            dry_run: execution.dry_run,
            created_at: now,
            applied_at: if status == ActionStatus::Applied {
                Some(now)
            } else {
                None
            },
            rolled_back_at: None,
            rollback_reason: None,
        }
    }

    pub fn with_values(mut self, old: Option<FieldValue>, new: Option<FieldValue>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn mark_applied(&mut self, now: DateTime<Utc>) {
        self.status = ActionStatus::Applied;
        self.applied_at = Some(now);
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, response: Option<serde_json::Value>) {
        self.status = ActionStatus::Failed;
        self.error_message = Some(message.into());
        self.api_response = response;
    }

    /// Status and timestamp always change together.
    pub fn mark_rolled_back(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = ActionStatus::RolledBack;
        self.rolled_back_at = Some(now);
        self.rollback_reason = Some(reason.into());
    }
}
