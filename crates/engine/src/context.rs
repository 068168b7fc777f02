//! Shared engine wiring: collaborators plus the components built on them.

use std::sync::Arc;
use std::time::Duration;

use autopilot_core::config::SchedulerConfig;
use autopilot_core::event_bus::{EventSink, TracingSink};
use autopilot_core::metric_source::MetricSource;
use autopilot_core::notify::{LogNotifier, Notifier};
use autopilot_core::store::RuleStore;
use autopilot_platforms::PlatformRouter;

use crate::evaluator::ConditionEvaluator;
use crate::executor::ActionExecutor;
use crate::guardrails::GuardrailEnforcer;
use crate::recorder::ExecutionRecorder;
use crate::savings::{SavingsEstimator, SpendAvoidedEstimator};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub max_concurrent_rules: usize,
    pub max_concurrent_entities_per_rule: usize,
    pub io_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for EngineSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            max_concurrent_rules: config.max_concurrent_rules.max(1),
            max_concurrent_entities_per_rule: config.max_concurrent_entities_per_rule.max(1),
            io_timeout: Duration::from_millis(config.io_timeout_ms.max(1)),
        }
    }
}

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn RuleStore>,
    pub platforms: PlatformRouter,
    pub evaluator: Arc<ConditionEvaluator>,
    pub executor: Arc<ActionExecutor>,
    pub guardrails: Arc<GuardrailEnforcer>,
    pub recorder: Arc<ExecutionRecorder>,
    pub savings: Arc<dyn SavingsEstimator>,
    pub events: Arc<dyn EventSink>,
    pub settings: EngineSettings,
}

impl EngineContext {
    pub fn builder(
        store: Arc<dyn RuleStore>,
        metrics: Arc<dyn MetricSource>,
        platforms: PlatformRouter,
    ) -> EngineContextBuilder {
        EngineContextBuilder {
            store,
            metrics,
            platforms,
            notifier: Arc::new(LogNotifier),
            events: Arc::new(TracingSink),
            savings: Arc::new(SpendAvoidedEstimator),
            settings: EngineSettings::default(),
        }
    }
}

pub struct EngineContextBuilder {
    store: Arc<dyn RuleStore>,
    metrics: Arc<dyn MetricSource>,
    platforms: PlatformRouter,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventSink>,
    savings: Arc<dyn SavingsEstimator>,
    settings: EngineSettings,
}

impl EngineContextBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn savings(mut self, savings: Arc<dyn SavingsEstimator>) -> Self {
        self.savings = savings;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> EngineContext {
        let io_timeout = self.settings.io_timeout;
        EngineContext {
            evaluator: Arc::new(ConditionEvaluator::new(self.metrics, io_timeout)),
            executor: Arc::new(ActionExecutor::new(
                self.platforms.clone(),
                self.notifier,
                io_timeout,
            )),
            guardrails: Arc::new(GuardrailEnforcer::new()),
            recorder: Arc::new(ExecutionRecorder::new(
                self.store.clone(),
                self.events.clone(),
                io_timeout,
            )),
            store: self.store,
            platforms: self.platforms,
            savings: self.savings,
            events: self.events,
            settings: self.settings,
        }
    }
}
