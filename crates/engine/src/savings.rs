//! Cost-saved estimation for applied actions.

use std::sync::Arc;

use autopilot_core::config::{SavingsConfig, SavingsStrategy};
use autopilot_core::types::{ActionHistory, ActionStatus, ActionType, AdEntity, EntityStatus, FieldValue};

pub trait SavingsEstimator: Send + Sync {
    /// Estimated daily spend saved by an applied row. Dry-run and unapplied
    /// rows save nothing.
    fn estimate(&self, row: &ActionHistory, entity: &AdEntity) -> f64;
}

/// Counts the spend avoided by pausing an entity (its daily budget) and by
/// budget reductions (old minus new).
pub struct SpendAvoidedEstimator;

impl SavingsEstimator for SpendAvoidedEstimator {
    fn estimate(&self, row: &ActionHistory, entity: &AdEntity) -> f64 {
        if row.dry_run || row.status != ActionStatus::Applied {
            return 0.0;
        }
        match (row.action_type, &row.old_value, &row.new_value) {
            (
                ActionType::Pause | ActionType::ChangeStatus,
                Some(FieldValue::Status(EntityStatus::Active)),
                Some(FieldValue::Status(EntityStatus::Paused | EntityStatus::Archived)),
            ) => entity.daily_budget.unwrap_or(0.0),
            (ActionType::AdjustBudget, Some(FieldValue::Amount(old)), Some(FieldValue::Amount(new))) => {
                (old - new).max(0.0)
            }
            _ => 0.0,
        }
    }
}

/// Flat amount per applied action.
pub struct FixedPerActionEstimator {
    pub amount: f64,
}

impl SavingsEstimator for FixedPerActionEstimator {
    fn estimate(&self, row: &ActionHistory, _entity: &AdEntity) -> f64 {
        if row.dry_run || row.status != ActionStatus::Applied {
            return 0.0;
        }
        self.amount
    }
}

pub fn estimator_from_config(config: &SavingsConfig) -> Arc<dyn SavingsEstimator> {
    match config.strategy {
        SavingsStrategy::SpendAvoided => Arc::new(SpendAvoidedEstimator),
        SavingsStrategy::FixedPerAction => Arc::new(FixedPerActionEstimator {
            amount: config.fixed_amount,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::types::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entity() -> AdEntity {
        AdEntity {
            id: "c-1".into(),
            name: "Brand".into(),
            platform: AdPlatform::Google,
            entity_type: EntityType::Campaign,
            account_id: None,
            status: EntityStatus::Active,
            daily_budget: Some(40.0),
            bid_amount: None,
            bid_cap: None,
        }
    }

    fn row(spec: ActionSpec, old: FieldValue, new: FieldValue) -> ActionHistory {
        let rule = Rule::new(Uuid::new_v4(), "r", AdPlatform::Google, EntityType::Campaign);
        let execution = Execution::start(&rule, Utc::now());
        ActionHistory::new(
            &execution,
            &Action::new(0, spec),
            EntityRef::from(&entity()),
            ActionStatus::Applied,
            Utc::now(),
        )
        .with_values(Some(old), Some(new))
    }

    #[test]
    fn test_pause_saves_daily_budget() {
        let r = row(
            ActionSpec::Pause,
            FieldValue::Status(EntityStatus::Active),
            FieldValue::Status(EntityStatus::Paused),
        );
        assert_eq!(SpendAvoidedEstimator.estimate(&r, &entity()), 40.0);
    }

    #[test]
    fn test_budget_cut_saves_difference_and_increase_saves_nothing() {
        let change = ActionSpec::AdjustBudget(BudgetChange {
            change_type: ChangeType::FixedAmount,
            change_value: -15.0,
            min_budget: None,
            max_budget: None,
        });
        let cut = row(change.clone(), FieldValue::Amount(40.0), FieldValue::Amount(25.0));
        assert_eq!(SpendAvoidedEstimator.estimate(&cut, &entity()), 15.0);
        let raise = row(change, FieldValue::Amount(40.0), FieldValue::Amount(55.0));
        assert_eq!(SpendAvoidedEstimator.estimate(&raise, &entity()), 0.0);
    }

    #[test]
    fn test_dry_run_saves_nothing() {
        let mut r = row(
            ActionSpec::Pause,
            FieldValue::Status(EntityStatus::Active),
            FieldValue::Status(EntityStatus::Paused),
        );
        r.dry_run = true;
        assert_eq!(SpendAvoidedEstimator.estimate(&r, &entity()), 0.0);
        assert_eq!(FixedPerActionEstimator { amount: 10.0 }.estimate(&r, &entity()), 0.0);
    }
}
