pub mod config;
pub mod error;
pub mod event_bus;
pub mod metric_source;
pub mod notify;
pub mod store;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{
    AutopilotError, AutopilotResult, MetricSourceError, StoreError, ValidationError,
};
pub use event_bus::{EngineEvent, EngineEventType, EventSink};
pub use metric_source::{DailyMetrics, DateRange, MetricSource};
pub use notify::{NotificationMessage, Notifier};
pub use store::{RuleStore, RunOutcome, StatusChange};
pub use validation::validate_rule;
