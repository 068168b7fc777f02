//! Rule engine — evaluation, guardrails, execution, scheduling and the
//! manual approval / rollback paths.

pub mod approval;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod guardrails;
pub mod lifecycle;
pub mod recorder;
pub mod rollback;
pub mod runner;
pub mod savings;
pub mod scheduler;

pub use approval::ApprovalService;
pub use context::{EngineContext, EngineContextBuilder, EngineSettings};
pub use error::{ActionError, ApprovalError, EngineError, LifecycleError, RollbackError};
pub use evaluator::{ConditionEvaluator, Evaluation, MetricSnapshot};
pub use executor::{ActionExecutor, AppliedChange, TemplateContext};
pub use guardrails::{CapReservation, Decision, GuardrailEnforcer};
pub use lifecycle::{RuleCommand, RuleDefinition, RuleService};
pub use recorder::{ExecutionRecorder, RunTally};
pub use rollback::RollbackManager;
pub use runner::{CancelFlag, RuleRunner};
pub use savings::{estimator_from_config, SavingsEstimator};
pub use scheduler::{RuleScheduler, RunRegistry};
