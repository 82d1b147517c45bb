//! Reconciliation engine for moorage environments.
//!
//! This crate turns a list of workflow steps into a prepared environment:
//! requirement extraction (`extract_requirements`), current-state inspection
//! (`ResourceInspector`), diffing into a dependency graph of preparation tasks
//! (`TaskPlanner`), failure classification with retry backoff
//! (`ErrorClassifier`, `RetryPolicy`), and the `Orchestrator` that runs the
//! whole pipeline through a backend-specific `ProviderBundle` resolved from a
//! `ProviderRegistry`.

pub mod classify;
pub mod extract;
pub mod inspect;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod task;

pub use classify::{
    ClassifiedError, ErrorCategory, ErrorClassifier, ErrorReport, FailureClassifier, Severity,
};
pub use extract::extract_requirements;
pub use inspect::{DockerInspector, ResourceInspector};
pub use orchestrator::{Orchestrator, PreparationResult, Sleeper, TaskOutcome};
pub use planner::{DockerPlanner, TaskPlanner};
pub use registry::{ProviderBundle, ProviderFactory, ProviderRegistry};
pub use retry::RetryPolicy;
pub use task::{dependency_batches, sort_tasks, PreparationTask, TaskBatch, TaskType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("runtime error: {0}")]
    Runtime(#[from] moorage_runtime::RuntimeError),
    #[error("no provider registered for environment type '{0}'")]
    UnknownEnvType(String),
    #[error("provider for '{env_type}' could not be created: {reason}")]
    Provider { env_type: String, reason: String },
}
