//! Approval service — applies or rejects actions queued by rules that
//! require approval.

use autopilot_core::error::StoreError;
use autopilot_core::event_bus::{make_event, EngineEventType};
use autopilot_core::types::{ActionHistory, ActionStatus};
use autopilot_platforms::PlatformError;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::error::ApprovalError;
use crate::executor::TemplateContext;

const APPROVED_METRICS_NOTE: &str = "approved manually";

/// Exclusive hold on one history row while a request works on it. Released
/// on drop, also when the request future is dropped mid-await.
pub(crate) struct RowClaim<'a> {
    rows: &'a DashSet<Uuid>,
    id: Uuid,
}

impl<'a> RowClaim<'a> {
    pub(crate) fn acquire(rows: &'a DashSet<Uuid>, id: Uuid) -> Option<Self> {
        rows.insert(id).then_some(Self { rows, id })
    }
}

impl Drop for RowClaim<'_> {
    fn drop(&mut self) {
        self.rows.remove(&self.id);
    }
}

pub struct ApprovalService {
    ctx: EngineContext,
    in_flight: DashSet<Uuid>,
}

impl ApprovalService {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            in_flight: DashSet::new(),
        }
    }

    pub async fn pending(&self, caller: Uuid) -> Result<Vec<ActionHistory>, ApprovalError> {
        Ok(self.ctx.store.pending_approvals(caller).await?)
    }

    async fn load_pending(&self, history_id: Uuid, caller: Uuid) -> Result<ActionHistory, ApprovalError> {
        let row = match self.ctx.store.get_history(history_id).await {
            Ok(row) if row.owner_id == caller => row,
            Ok(_) | Err(StoreError::HistoryNotFound(_)) => return Err(ApprovalError::NotFound(history_id)),
            Err(e) => return Err(e.into()),
        };
        if row.status != ActionStatus::Pending {
            return Err(ApprovalError::NotPending {
                id: history_id,
                status: row.status,
            });
        }
        Ok(row)
    }

    /// Applies a pending action against the entity's current state. Platform
    /// failures end the row as `failed` rather than erroring.
    pub async fn approve(
        &self,
        history_id: Uuid,
        caller: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, ApprovalError> {
        let Some(_claim) = RowClaim::acquire(&self.in_flight, history_id) else {
            return Err(ApprovalError::InProgress(history_id));
        };
        self.approve_row(history_id, caller, now).await
    }

    async fn approve_row(
        &self,
        history_id: Uuid,
        caller: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, ApprovalError> {
        let mut row = self.load_pending(history_id, caller).await?;
        let rule = self.ctx.store.get_rule(row.rule_id).await?;

        let Some(reservation) = self
            .ctx
            .guardrails
            .reserve(self.ctx.store.as_ref(), &rule, now)
            .await?
        else {
            return Err(ApprovalError::DailyCapReached(rule.id));
        };

        let io_timeout = self.ctx.settings.io_timeout;
        let client = self.ctx.platforms.client(row.entity.platform)?;
        let entity = match tokio::time::timeout(io_timeout, client.get_entity(&row.entity.entity_id)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(io_timeout.as_millis() as u64)),
        };

        let applied = match entity {
            Ok(entity) => {
                let template = TemplateContext {
                    rule: &rule,
                    entity: &entity,
                    metrics: APPROVED_METRICS_NOTE,
                };
                self.ctx
                    .executor
                    .apply(&row.action, template)
                    .await
                    .map_err(|e| (e.to_string(), e.payload()))
            }
            Err(e) => Err((e.to_string(), e.to_payload())),
        };

        match applied {
            Ok(change) => {
                row.old_value = change.old_value;
                row.new_value = change.new_value;
                row.api_response = change.api_response;
                row.mark_applied(now);
            }
            Err((message, payload)) => {
                warn!(history_id = %history_id, error = %message, "Approved action failed");
                row.mark_failed(message, Some(payload));
            }
        }

        self.ctx.store.update_history(row.clone()).await?;
        drop(reservation);
        self.ctx.events.emit(
            make_event(EngineEventType::ActionApproved, row.rule_id)
                .with_execution(row.execution_id)
                .with_history(row.id)
                .with_entity(row.entity.entity_id.clone()),
        );
        metrics::counter!(
            "autopilot.approvals.approved",
            "platform" => row.entity.platform.as_str()
        )
        .increment(1);
        info!(
            history_id = %history_id,
            rule_id = %row.rule_id,
            status = ?row.status,
            "Pending action approved"
        );
        Ok(row)
    }

    /// Rejects a pending action. The row ends `rolled_back` with the reason.
    pub async fn reject(
        &self,
        history_id: Uuid,
        caller: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, ApprovalError> {
        let Some(_claim) = RowClaim::acquire(&self.in_flight, history_id) else {
            return Err(ApprovalError::InProgress(history_id));
        };
        self.reject_row(history_id, caller, reason, now).await
    }

    async fn reject_row(
        &self,
        history_id: Uuid,
        caller: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionHistory, ApprovalError> {
        let mut row = self.load_pending(history_id, caller).await?;
        row.mark_rolled_back(reason, now);
        self.ctx.store.update_history(row.clone()).await?;
        self.ctx.events.emit(
            make_event(EngineEventType::ActionRejected, row.rule_id)
                .with_execution(row.execution_id)
                .with_history(row.id)
                .with_entity(row.entity.entity_id.clone())
                .with_detail(reason),
        );
        metrics::counter!(
            "autopilot.approvals.rejected",
            "platform" => row.entity.platform.as_str()
        )
        .increment(1);
        info!(history_id = %history_id, rule_id = %row.rule_id, "Pending action rejected");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autopilot_core::event_bus::{capture_sink, CaptureSink};
    use autopilot_core::store::RuleStore;
    use autopilot_core::types::*;
    use autopilot_platforms::{PlatformRouter, SimulatedAdsClient};
    use autopilot_store::{InMemoryMetricSource, InMemoryRuleStore};

    struct Harness {
        store: Arc<InMemoryRuleStore>,
        client: Arc<SimulatedAdsClient>,
        sink: Arc<CaptureSink>,
        service: ApprovalService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRuleStore::new());
        let client = Arc::new(SimulatedAdsClient::google());
        client.add_entity(AdEntity {
            id: "cmp-1".into(),
            name: "Search - Brand".into(),
            platform: AdPlatform::Google,
            entity_type: EntityType::Campaign,
            account_id: None,
            status: EntityStatus::Active,
            daily_budget: Some(60.0),
            bid_amount: None,
            bid_cap: None,
        });
        let sink = capture_sink();
        let ctx = EngineContext::builder(
            store.clone(),
            Arc::new(InMemoryMetricSource::new()),
            PlatformRouter::new().with_client(client.clone()),
        )
        .events(sink.clone())
        .build();
        Harness {
            store,
            client,
            sink,
            service: ApprovalService::new(ctx),
        }
    }

    async fn queued(h: &Harness, cap: Option<u32>) -> (Rule, ActionHistory) {
        let mut rule = Rule::new(Uuid::new_v4(), "Approve pauses", AdPlatform::Google, EntityType::Campaign);
        rule.require_approval = true;
        rule.max_daily_actions = cap;
        h.store.insert_rule(rule.clone()).await.unwrap();
        let row = pending_row(h, &rule).await;
        (rule, row)
    }

    async fn pending_row(h: &Harness, rule: &Rule) -> ActionHistory {
        let execution = Execution::start(rule, Utc::now());
        let entity = h.client.entity("cmp-1").unwrap().entity;
        let row = ActionHistory::new(
            &execution,
            &Action::new(0, ActionSpec::Pause),
            EntityRef::from(&entity),
            ActionStatus::Pending,
            Utc::now(),
        )
        .with_values(
            Some(FieldValue::Status(EntityStatus::Active)),
            Some(FieldValue::Status(EntityStatus::Paused)),
        );
        h.store.insert_history(row.clone()).await.unwrap();
        row
    }

    #[tokio::test]
    async fn test_approve_applies_pending_row() {
        let h = harness();
        let (rule, row) = queued(&h, None).await;
        assert_eq!(h.service.pending(rule.owner_id).await.unwrap().len(), 1);

        let approved = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap();
        assert_eq!(approved.status, ActionStatus::Applied);
        assert!(approved.applied_at.is_some());
        assert_eq!(h.client.entity("cmp-1").unwrap().entity.status, EntityStatus::Paused);
        assert_eq!(h.sink.count_type(EngineEventType::ActionApproved), 1);
        assert!(h.service.pending(rule.owner_id).await.unwrap().is_empty());

        let again = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap_err();
        assert!(matches!(again, ApprovalError::NotPending { .. }));
    }

    #[tokio::test]
    async fn test_approve_platform_failure_marks_failed() {
        let h = harness();
        let (rule, row) = queued(&h, None).await;
        h.client.fail_entity(
            "cmp-1",
            PlatformError::Rejected {
                platform: AdPlatform::Google,
                code: "CAMPAIGN_REMOVED".into(),
                message: "campaign was removed".into(),
            },
        );
        let approved = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap();
        assert_eq!(approved.status, ActionStatus::Failed);
        assert!(approved.error_message.unwrap().contains("campaign was removed"));
        assert!(approved.api_response.is_some());
    }

    #[tokio::test]
    async fn test_approve_respects_daily_cap() {
        let h = harness();
        let (rule, row) = queued(&h, Some(1)).await;
        let execution = Execution::start(&rule, Utc::now());
        let entity = h.client.entity("cmp-1").unwrap().entity;
        let earlier = ActionHistory::new(
            &execution,
            &Action::new(1, ActionSpec::ChangeBid { bid_amount: 1.0 }),
            EntityRef::from(&entity),
            ActionStatus::Applied,
            Utc::now(),
        );
        h.store.insert_history(earlier).await.unwrap();

        let err = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap_err();
        assert_eq!(err, ApprovalError::DailyCapReached(rule.id));
        assert_eq!(h.client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_marks_rolled_back_without_platform_call() {
        let h = harness();
        let (rule, row) = queued(&h, None).await;
        let rejected = h
            .service
            .reject(row.id, rule.owner_id, "too aggressive", Utc::now())
            .await
            .unwrap();
        assert_eq!(rejected.status, ActionStatus::RolledBack);
        assert_eq!(rejected.rollback_reason.as_deref(), Some("too aggressive"));
        assert!(rejected.rolled_back_at.is_some());
        assert_eq!(h.client.mutation_count(), 0);
        assert_eq!(h.sink.count_type(EngineEventType::ActionRejected), 1);
    }

    #[tokio::test]
    async fn test_foreign_row_reads_as_missing() {
        let h = harness();
        let (_, row) = queued(&h, None).await;
        let err = h.service.approve(row.id, Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert_eq!(err, ApprovalError::NotFound(row.id));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_of_one_row_apply_once() {
        let h = harness();
        let (rule, row) = queued(&h, None).await;
        h.client.set_latency(Some(std::time::Duration::from_millis(100)));

        let (first, second) = tokio::join!(
            h.service.approve(row.id, rule.owner_id, Utc::now()),
            h.service.approve(row.id, rule.owner_id, Utc::now()),
        );
        assert_eq!(first.unwrap().status, ActionStatus::Applied);
        assert_eq!(second.unwrap_err(), ApprovalError::InProgress(row.id));
        assert_eq!(h.client.mutation_count(), 1);
        assert_eq!(h.sink.count_type(EngineEventType::ActionApproved), 1);

        let again = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap_err();
        assert!(matches!(again, ApprovalError::NotPending { .. }));
    }

    #[tokio::test]
    async fn test_abandoned_approval_releases_the_row() {
        let h = harness();
        let (rule, row) = queued(&h, Some(1)).await;
        h.client.set_latency(Some(std::time::Duration::from_millis(200)));

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            h.service.approve(row.id, rule.owner_id, Utc::now()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(h.service.ctx.guardrails.in_flight(rule.id), 0);

        h.client.set_latency(None);
        let approved = h.service.approve(row.id, rule.owner_id, Utc::now()).await.unwrap();
        assert_eq!(approved.status, ActionStatus::Applied);
    }

    #[tokio::test]
    async fn test_reject_while_approving_is_refused() {
        let h = harness();
        let (rule, row) = queued(&h, None).await;
        h.client.set_latency(Some(std::time::Duration::from_millis(100)));

        let (approved, rejected) = tokio::join!(
            h.service.approve(row.id, rule.owner_id, Utc::now()),
            h.service.reject(row.id, rule.owner_id, "changed my mind", Utc::now()),
        );
        assert_eq!(approved.unwrap().status, ActionStatus::Applied);
        assert_eq!(rejected.unwrap_err(), ApprovalError::InProgress(row.id));
        let stored = h.store.get_history(row.id).await.unwrap();
        assert_eq!(stored.status, ActionStatus::Applied);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_share_the_daily_cap() {
        let h = harness();
        let (rule, first) = queued(&h, Some(1)).await;
        let second = pending_row(&h, &rule).await;
        h.client.set_latency(Some(std::time::Duration::from_millis(100)));

        let (a, b) = tokio::join!(
            h.service.approve(first.id, rule.owner_id, Utc::now()),
            h.service.approve(second.id, rule.owner_id, Utc::now()),
        );
        assert_eq!(a.unwrap().status, ActionStatus::Applied);
        assert_eq!(b.unwrap_err(), ApprovalError::DailyCapReached(rule.id));
        assert_eq!(h.client.mutation_count(), 1);

        let since = Utc::now() - chrono::Duration::hours(24);
        assert_eq!(h.store.count_applied_since(rule.id, since).await.unwrap(), 1);
        assert_eq!(
            h.store.get_history(second.id).await.unwrap().status,
            ActionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_failed_approval_returns_its_cap_slot() {
        let h = harness();
        let (rule, first) = queued(&h, Some(1)).await;
        let second = pending_row(&h, &rule).await;
        h.client.fail_entity(
            "cmp-1",
            PlatformError::RateLimited(AdPlatform::Google),
        );
        let failed = h.service.approve(first.id, rule.owner_id, Utc::now()).await.unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);

        h.client.clear_failure("cmp-1");
        let applied = h.service.approve(second.id, rule.owner_id, Utc::now()).await.unwrap();
        assert_eq!(applied.status, ActionStatus::Applied);
    }
}
