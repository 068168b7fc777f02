//! Rollback manager — manual restore of an applied action's previous value.

use std::sync::Arc;

use autopilot_core::error::StoreError;
use autopilot_core::event_bus::{make_event, EngineEventType, EventSink};
use autopilot_core::store::RuleStore;
use autopilot_core::types::{ActionHistory, ActionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval::RowClaim;
use crate::context::EngineContext;
use crate::error::RollbackError;
use crate::executor::ActionExecutor;

pub struct RollbackManager {
    store: Arc<dyn RuleStore>,
    executor: Arc<ActionExecutor>,
    events: Arc<dyn EventSink>,
    in_flight: DashSet<Uuid>,
}

impl RollbackManager {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            executor: ctx.executor.clone(),
            events: ctx.events.clone(),
            in_flight: DashSet::new(),
        }
    }

    /// Restores the recorded old value and marks the row `rolled_back`.
    /// Dry-run rows never touched the platform, so only the row changes.
    pub async fn rollback(
        &self,
        history_id: Uuid,
        caller: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, RollbackError> {
        let Some(_claim) = RowClaim::acquire(&self.in_flight, history_id) else {
            return Err(RollbackError::AlreadyRolledBack(history_id));
        };
        self.rollback_row(history_id, caller, reason, now).await
    }

    async fn rollback_row(
        &self,
        history_id: Uuid,
        caller: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, RollbackError> {
        let mut row = match self.store.get_history(history_id).await {
            Ok(row) if row.owner_id == caller => row,
            Ok(_) | Err(StoreError::HistoryNotFound(_)) => {
                return Err(RollbackError::NotFound(history_id))
            }
            Err(e) => return Err(e.into()),
        };
        if !row.can_rollback {
            return Err(RollbackError::NotRollbackable(history_id));
        }
        if row.status == ActionStatus::RolledBack {
            return Err(RollbackError::AlreadyRolledBack(history_id));
        }
        if row.status != ActionStatus::Applied {
            return Err(RollbackError::NotApplied {
                id: history_id,
                status: row.status,
            });
        }

        if !row.dry_run {
            if let Err(e) = self.executor.restore(&row).await {
                warn!(
                    history_id = %history_id,
                    entity_id = %row.entity.entity_id,
                    error = %e,
                    "Rollback restore failed"
                );
                metrics::counter!(
                    "autopilot.rollbacks.failed",
                    "platform" => row.entity.platform.as_str()
                )
                .increment(1);
                return Err(e.into());
            }
        }

        row.mark_rolled_back(reason, now);
        self.store.update_history(row.clone()).await?;
        self.events.emit(
            make_event(EngineEventType::ActionRolledBack, row.rule_id)
                .with_execution(row.execution_id)
                .with_history(row.id)
                .with_entity(row.entity.entity_id.clone())
                .with_detail(reason),
        );
        metrics::counter!(
            "autopilot.actions.rolled_back",
            "platform" => row.entity.platform.as_str()
        )
        .increment(1);
        info!(
            history_id = %history_id,
            rule_id = %row.rule_id,
            entity_id = %row.entity.entity_id,
            field = ?row.field_changed,
            dry_run = row.dry_run,
            "Action rolled back"
        );
        Ok(row)
    }
}
