//! In-memory reference implementations of the persistence and metric collaborators.

pub mod memory;
pub mod metrics;

pub use memory::InMemoryRuleStore;
pub use metrics::InMemoryMetricSource;
