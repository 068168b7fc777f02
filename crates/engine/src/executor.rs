//! Action executor — translates action specs into platform calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::notify::{NotificationMessage, Notifier};
use autopilot_core::types::*;
use autopilot_platforms::{AdsPlatform, MutationOutcome, PlatformError, PlatformRouter};
use serde_json::json;
use tracing::debug;

use crate::error::ActionError;

pub const DEFAULT_DUPLICATE_SUFFIX: &str = " (Copy)";

pub const DEFAULT_NOTIFICATION_TEMPLATE: &str = "Rule \"{{rule_name}}\" triggered for \
{{entity_type}} \"{{entity_name}}\" ({{entity_id}}) on {{platform}}. Metrics: {{metrics}}";

/// Before/after values of one action application.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub api_response: Option<serde_json::Value>,
    /// False when nothing was sent to the platform or the platform reported no change.
    pub mutated: bool,
}

/// Values available to notification templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub rule: &'a Rule,
    pub entity: &'a AdEntity,
    pub metrics: &'a str,
}

pub fn render_template(template: Option<&str>, ctx: TemplateContext<'_>) -> String {
    template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_NOTIFICATION_TEMPLATE)
        .replace("{{rule_name}}", &ctx.rule.name)
        .replace("{{entity_name}}", &ctx.entity.name)
        .replace("{{entity_id}}", &ctx.entity.id)
        .replace("{{entity_type}}", ctx.entity.entity_type.as_str())
        .replace("{{platform}}", ctx.entity.platform.as_str())
        .replace("{{metrics}}", ctx.metrics)
}

/// New daily budget for `change` applied to `current`: clamped into the
/// optional bounds, never negative, rounded to cents.
pub fn compute_budget(change: &BudgetChange, current: f64) -> f64 {
    let mut next = match change.change_type {
        ChangeType::Percent => current * (1.0 + change.change_value / 100.0),
        ChangeType::FixedAmount => current + change.change_value,
    };
    if let Some(min) = change.min_budget {
        next = next.max(min);
    }
    if let Some(max) = change.max_budget {
        next = next.min(max);
    }
    (next.max(0.0) * 100.0).round() / 100.0
}

fn strategy_label(strategy: BiddingStrategy, target: Option<f64>) -> String {
    match target {
        Some(t) => format!("{} ({:.2})", strategy.as_str(), t),
        None => strategy.as_str().to_string(),
    }
}

fn channel_list(channels: &[NotificationChannel]) -> String {
    channels
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct ActionExecutor {
    platforms: PlatformRouter,
    notifier: Arc<dyn Notifier>,
    io_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(platforms: PlatformRouter, notifier: Arc<dyn Notifier>, io_timeout: Duration) -> Self {
        Self {
            platforms,
            notifier,
            io_timeout,
        }
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, ActionError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(ActionError::from),
            Err(_) => Err(PlatformError::Timeout(self.io_timeout.as_millis() as u64).into()),
        }
    }

    /// Applies one action to one entity. Notifications go to the notifier,
    /// everything else to the entity's platform.
    pub async fn apply(
        &self,
        action: &ActionSpec,
        ctx: TemplateContext<'_>,
    ) -> Result<AppliedChange, ActionError> {
        match action {
            ActionSpec::SendNotification {
                channels,
                message_template,
            } => Ok(self.notify(channels, message_template.as_deref(), ctx)),
            _ => self.apply_on_platform(action, ctx.entity).await,
        }
    }

    async fn apply_on_platform(
        &self,
        action: &ActionSpec,
        entity: &AdEntity,
    ) -> Result<AppliedChange, ActionError> {
        let client = self.platforms.client(entity.platform)?;
        let client = client.as_ref();
        debug!(
            entity_id = %entity.id,
            platform = entity.platform.as_str(),
            action = action.action_type().as_str(),
            "Applying action"
        );

        match action {
            ActionSpec::Pause => self.set_status(client, entity, EntityStatus::Paused).await,
            ActionSpec::Resume => self.set_status(client, entity, EntityStatus::Active).await,
            ActionSpec::ChangeStatus { target_status } => {
                self.set_status(client, entity, *target_status).await
            }
            ActionSpec::AdjustBudget(change) => {
                let current = self
                    .call(client.get_entity(&entity.id))
                    .await?
                    .daily_budget
                    .ok_or_else(|| ActionError::MissingField {
                        entity_id: entity.id.clone(),
                        field: "daily_budget",
                    })?;
                let next = compute_budget(change, current);
                if next == current {
                    return Ok(AppliedChange {
                        old_value: Some(FieldValue::Amount(current)),
                        new_value: Some(FieldValue::Amount(current)),
                        api_response: None,
                        mutated: false,
                    });
                }
                let response = self.call(client.set_daily_budget(&entity.id, next)).await?;
                Ok(AppliedChange {
                    old_value: Some(FieldValue::Amount(current)),
                    new_value: Some(FieldValue::Amount(next)),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::ChangeBid { bid_amount } => {
                let current = self.call(client.get_entity(&entity.id)).await?.bid_amount;
                let response = self.call(client.set_bid(&entity.id, *bid_amount)).await?;
                Ok(AppliedChange {
                    old_value: current.map(FieldValue::Amount),
                    new_value: Some(FieldValue::Amount(*bid_amount)),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::SetBidCap { amount } => {
                let current = self.call(client.get_entity(&entity.id)).await?.bid_cap;
                let response = self.call(client.set_bid_cap(&entity.id, *amount)).await?;
                Ok(AppliedChange {
                    old_value: current.map(FieldValue::Amount),
                    new_value: Some(FieldValue::Amount(*amount)),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::AddNegativeKeyword {
                keyword,
                match_type,
            } => {
                let response = self
                    .call(client.add_negative_keyword(&entity.id, keyword, *match_type))
                    .await?;
                Ok(AppliedChange {
                    old_value: None,
                    new_value: Some(FieldValue::Text(keyword.clone())),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::ExcludePlacement { placement } => {
                let response = self.call(client.exclude_placement(&entity.id, placement)).await?;
                Ok(AppliedChange {
                    old_value: None,
                    new_value: Some(FieldValue::Text(placement.clone())),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::ChangeBiddingStrategy { strategy, target } => {
                let response = self
                    .call(client.set_bidding_strategy(&entity.id, *strategy, *target))
                    .await?;
                Ok(AppliedChange {
                    old_value: None,
                    new_value: Some(FieldValue::Text(strategy_label(*strategy, *target))),
                    mutated: response.outcome == MutationOutcome::Changed,
                    api_response: Some(response.raw),
                })
            }
            ActionSpec::DuplicateWinner {
                name_suffix,
                budget_multiplier,
            } => {
                let suffix = name_suffix.as_deref().unwrap_or(DEFAULT_DUPLICATE_SUFFIX);
                let copy = self
                    .call(client.duplicate_entity(&entity.id, suffix, *budget_multiplier))
                    .await?;
                Ok(AppliedChange {
                    old_value: Some(FieldValue::Text(entity.id.clone())),
                    new_value: Some(FieldValue::Text(copy.id.clone())),
                    api_response: Some(json!({
                        "new_entity_id": copy.id,
                        "name": copy.name,
                        "daily_budget": copy.daily_budget,
                    })),
                    mutated: true,
                })
            }
            ActionSpec::SendNotification { .. } => Err(PlatformError::Unsupported {
                platform: entity.platform,
                operation: "send_notification",
            }
            .into()),
        }
    }

    /// Computes what `apply` would do from the entity snapshot alone.
    /// Holds no platform handle, so it cannot mutate anything.
    pub fn preview(action: &ActionSpec, ctx: TemplateContext<'_>) -> AppliedChange {
        let entity = ctx.entity;
        let (old_value, new_value) = match action {
            ActionSpec::Pause => (
                Some(FieldValue::Status(entity.status)),
                Some(FieldValue::Status(EntityStatus::Paused)),
            ),
            ActionSpec::Resume => (
                Some(FieldValue::Status(entity.status)),
                Some(FieldValue::Status(EntityStatus::Active)),
            ),
            ActionSpec::ChangeStatus { target_status } => (
                Some(FieldValue::Status(entity.status)),
                Some(FieldValue::Status(*target_status)),
            ),
            ActionSpec::AdjustBudget(change) => match entity.daily_budget {
                Some(current) => (
                    Some(FieldValue::Amount(current)),
                    Some(FieldValue::Amount(compute_budget(change, current))),
                ),
                None => (None, None),
            },
            ActionSpec::ChangeBid { bid_amount } => (
                entity.bid_amount.map(FieldValue::Amount),
                Some(FieldValue::Amount(*bid_amount)),
            ),
            ActionSpec::SetBidCap { amount } => (
                entity.bid_cap.map(FieldValue::Amount),
                Some(FieldValue::Amount(*amount)),
            ),
            ActionSpec::AddNegativeKeyword { keyword, .. } => {
                (None, Some(FieldValue::Text(keyword.clone())))
            }
            ActionSpec::ExcludePlacement { placement } => {
                (None, Some(FieldValue::Text(placement.clone())))
            }
            ActionSpec::ChangeBiddingStrategy { strategy, target } => {
                (None, Some(FieldValue::Text(strategy_label(*strategy, *target))))
            }
            ActionSpec::DuplicateWinner { .. } => (Some(FieldValue::Text(entity.id.clone())), None),
            ActionSpec::SendNotification { channels, .. } => {
                (None, Some(FieldValue::Text(channel_list(channels))))
            }
        };
        let api_response = match action {
            ActionSpec::SendNotification {
                message_template, ..
            } => json!({
                "dry_run": true,
                "message": render_template(message_template.as_deref(), ctx),
            }),
            _ => json!({ "dry_run": true }),
        };
        AppliedChange {
            old_value,
            new_value,
            api_response: Some(api_response),
            mutated: false,
        }
    }

    /// Re-applies the recorded old value of a reversible action.
    pub async fn restore(&self, row: &ActionHistory) -> Result<serde_json::Value, ActionError> {
        let client = self.platforms.client(row.entity.platform)?;
        let id = row.entity.entity_id.as_str();
        let response = match (row.field_changed, &row.old_value) {
            (ActionField::Status, Some(FieldValue::Status(status))) => {
                self.call(client.set_status(id, *status)).await?
            }
            (ActionField::DailyBudget, Some(FieldValue::Amount(amount))) => {
                self.call(client.set_daily_budget(id, *amount)).await?
            }
            (ActionField::Bid, Some(FieldValue::Amount(amount))) => {
                self.call(client.set_bid(id, *amount)).await?
            }
            (ActionField::BidCap, Some(FieldValue::Amount(amount))) => {
                self.call(client.set_bid_cap(id, *amount)).await?
            }
            _ => return Err(ActionError::NothingToRestore),
        };
        Ok(response.raw)
    }

    async fn set_status(
        &self,
        client: &dyn AdsPlatform,
        entity: &AdEntity,
        target: EntityStatus,
    ) -> Result<AppliedChange, ActionError> {
        let current = self.call(client.get_entity(&entity.id)).await?.status;
        let response = self.call(client.set_status(&entity.id, target)).await?;
        Ok(AppliedChange {
            old_value: Some(FieldValue::Status(current)),
            new_value: Some(FieldValue::Status(target)),
            mutated: response.outcome == MutationOutcome::Changed,
            api_response: Some(response.raw),
        })
    }

    fn notify(
        &self,
        channels: &[NotificationChannel],
        template: Option<&str>,
        ctx: TemplateContext<'_>,
    ) -> AppliedChange {
        let body = render_template(template, ctx);
        self.notifier.notify(NotificationMessage {
            rule_id: ctx.rule.id,
            owner_id: ctx.rule.owner_id,
            entity_id: ctx.entity.id.clone(),
            channels: channels.to_vec(),
            subject: format!("Autopilot: {}", ctx.rule.name),
            body: body.clone(),
        });
        AppliedChange {
            old_value: None,
            new_value: Some(FieldValue::Text(channel_list(channels))),
            api_response: Some(json!({ "channels": channels, "message": body })),
            mutated: false,
        }
    }
}
