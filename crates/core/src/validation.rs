//! Save-time validation of rule definitions.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{ActionSpec, Operator, Rule};

/// Checks a rule definition before it is persisted. Returns the first problem found.
pub fn validate_rule(rule: &Rule) -> Result<(), ValidationError> {
    if rule.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if rule.check_frequency_minutes == 0 {
        return Err(ValidationError::InvalidFrequency);
    }
    if rule.max_daily_actions == Some(0) {
        return Err(ValidationError::InvalidDailyCap);
    }
    if rule.conditions.is_empty() {
        return Err(ValidationError::NoConditions);
    }
    if rule.actions.is_empty() {
        return Err(ValidationError::NoActions);
    }

    let mut seen = HashSet::new();
    for condition in &rule.conditions {
        let position = condition.position;
        if !seen.insert(position) {
            return Err(ValidationError::DuplicatePosition {
                kind: "condition",
                position,
            });
        }
        if condition.time_window_days == 0 {
            return Err(ValidationError::InvalidWindow { position });
        }
        if !condition.threshold.is_finite() {
            return Err(ValidationError::NonFiniteThreshold { position });
        }
        if condition.operator == Operator::Between {
            match condition.threshold_max {
                Some(max) if max.is_finite() && max >= condition.threshold => {}
                _ => return Err(ValidationError::InvalidBetween { position }),
            }
        }
    }

    let mut seen = HashSet::new();
    for action in &rule.actions {
        let position = action.position;
        if !seen.insert(position) {
            return Err(ValidationError::DuplicatePosition {
                kind: "action",
                position,
            });
        }
        let action_type = action.action_type();
        if !action_type.supported_on(rule.platform) {
            return Err(ValidationError::UnsupportedOnPlatform {
                position,
                action: action_type.to_string(),
                platform: rule.platform.to_string(),
            });
        }
        validate_action(&action.spec).map_err(|reason| ValidationError::InvalidAction {
            position,
            reason,
        })?;
    }

    Ok(())
}

fn validate_action(spec: &ActionSpec) -> Result<(), String> {
    match spec {
        ActionSpec::AdjustBudget(change) => {
            if !change.change_value.is_finite() {
                return Err("change_value must be finite".into());
            }
            for bound in [change.min_budget, change.max_budget].into_iter().flatten() {
                if !bound.is_finite() || bound < 0.0 {
                    return Err("budget bounds must be non-negative".into());
                }
            }
            if let (Some(min), Some(max)) = (change.min_budget, change.max_budget) {
                if min > max {
                    return Err("min_budget must not exceed max_budget".into());
                }
            }
            Ok(())
        }
        ActionSpec::ChangeBid { bid_amount } => positive("bid_amount", *bid_amount),
        ActionSpec::SetBidCap { amount } => positive("amount", *amount),
        ActionSpec::DuplicateWinner {
            budget_multiplier, ..
        } => match budget_multiplier {
            Some(m) => positive("budget_multiplier", *m),
            None => Ok(()),
        },
        ActionSpec::SendNotification { channels, .. } => {
            if channels.is_empty() {
                Err("at least one notification channel is required".into())
            } else {
                Ok(())
            }
        }
        ActionSpec::AddNegativeKeyword { keyword, .. } => non_empty("keyword", keyword),
        ActionSpec::ExcludePlacement { placement } => non_empty("placement", placement),
        ActionSpec::ChangeBiddingStrategy { strategy, target } => {
            match (strategy.requires_target(), target) {
                (true, None) => Err(format!("{} requires a target", strategy.as_str())),
                (_, Some(t)) => positive("target", *t),
                (false, None) => Ok(()),
            }
        }
        ActionSpec::Pause | ActionSpec::Resume | ActionSpec::ChangeStatus { .. } => Ok(()),
    }
}

fn positive(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{field} must be a positive number"))
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}
