//! Engine event bus — trait for emitting run and action lifecycle events.
//!
//! Engine components accept an `Arc<dyn EventSink>`; the binary wires a
//! logging sink, tests wire a `CaptureSink`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventType {
    RuleCreated,
    RuleStatusChanged,
    RuleDeleted,
    RunStarted,
    RunCompleted,
    RunFailed,
    RunCancelled,
    ActionApplied,
    ActionSimulated,
    ActionPending,
    ActionFailed,
    ActionSkipped,
    ActionRolledBack,
    ActionApproved,
    ActionRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub event_type: EngineEventType,
    pub rule_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub history_id: Option<Uuid>,
    pub entity_id: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn with_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_history(mut self, history_id: Uuid) -> Self {
        self.history_id = Some(history_id);
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for emitting engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// No-op sink for components that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Sink that forwards every event to `tracing` at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        tracing::debug!(
            event_type = ?event.event_type,
            rule_id = %event.rule_id,
            execution_id = ?event.execution_id,
            history_id = ?event.history_id,
            entity_id = ?event.entity_id,
            detail = ?event.detail,
            "Engine event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EngineEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for an event scoped to a rule.
pub fn make_event(event_type: EngineEventType, rule_id: Uuid) -> EngineEvent {
    EngineEvent {
        event_id: Uuid::new_v4(),
        event_type,
        rule_id,
        execution_id: None,
        history_id: None,
        entity_id: None,
        detail: None,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
