//! Guardrails — decide whether a candidate action may run now.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use autopilot_core::error::StoreError;
use autopilot_core::store::RuleStore;
use autopilot_core::types::Rule;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outcome of the guardrail check for one action on one entity.
#[derive(Debug)]
pub enum Decision {
    /// Proceed to the executor holding a daily-cap slot.
    Apply(CapReservation),
    QueueForApproval,
    Simulate,
    /// Daily cap reached. No history row is written.
    Skip,
}

/// Daily-cap state of one rule, shared by every run and approval.
#[derive(Debug, Default)]
struct RuleCap {
    gate: Mutex<()>,
    in_flight: AtomicU32,
}

/// A held daily-cap slot.
///
/// Hold it until the applied row is persisted. Once dropped the stored row
/// is what counts against the cap; a failed action simply drops it.
#[derive(Debug)]
pub struct CapReservation {
    slot: Option<Arc<RuleCap>>,
}

impl CapReservation {
    fn unlimited() -> Self {
        Self { slot: None }
    }
}

impl Drop for CapReservation {
    fn drop(&mut self) {
        if let Some(slot) = &self.slot {
            let _ = slot
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }
}

/// Enforces dry-run, approval and daily-cap guardrails.
///
/// One enforcer is shared by the scheduler's runs and the approval path so
/// every reservation for a rule goes through the same per-rule gate.
#[derive(Debug, Default)]
pub struct GuardrailEnforcer {
    caps: DashMap<Uuid, Arc<RuleCap>>,
}

impl GuardrailEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves one daily-cap slot, or `None` when the cap is reached.
    ///
    /// Applied, non-dry-run rows in the trailing 24 hours plus slots still
    /// in flight count against the cap. The count and the reservation happen
    /// under the rule's gate, so two callers never pass on the same count.
    pub async fn reserve(
        &self,
        store: &dyn RuleStore,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> Result<Option<CapReservation>, StoreError> {
        let Some(cap) = rule.max_daily_actions else {
            return Ok(Some(CapReservation::unlimited()));
        };
        let slot = self.caps.entry(rule.id).or_default().clone();
        let _gate = slot.gate.lock().await;

        let applied = store
            .count_applied_since(rule.id, now - Duration::hours(24))
            .await?;
        if applied.saturating_add(slot.in_flight.load(Ordering::SeqCst)) >= cap {
            return Ok(None);
        }
        slot.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CapReservation { slot: Some(slot.clone()) }))
    }

    /// Dry-run wins over approval, approval over the cap. Dry-run and
    /// pending actions never consume cap slots.
    pub async fn decide(
        &self,
        store: &dyn RuleStore,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        if rule.dry_run {
            return Ok(Decision::Simulate);
        }
        if rule.require_approval {
            return Ok(Decision::QueueForApproval);
        }
        Ok(match self.reserve(store, rule, now).await? {
            Some(reservation) => Decision::Apply(reservation),
            None => Decision::Skip,
        })
    }

    /// Slots currently reserved for the rule and not yet released.
    #[cfg(test)]
    pub(crate) fn in_flight(&self, rule_id: Uuid) -> u32 {
        self.caps
            .get(&rule_id)
            .map(|slot| slot.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}
