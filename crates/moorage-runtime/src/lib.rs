//! Execution layer for moorage.
//!
//! This crate implements the driver capability the engine orchestrates
//! through: an `Operation` vocabulary, the pluggable `Driver` trait with a
//! docker CLI driver and an in-memory `MockDriver`, the composite operation
//! executor (sequential fail-fast or bounded-parallel order-preserving), and
//! the worker pool both the executor and the orchestrator share.

pub mod composite;
pub mod docker;
pub mod driver;
pub mod mock;
pub mod operation;
pub mod pool;

pub use composite::{
    CompositeExecutor, CompositeOperation, CompositeRun, ExecutionMode, LeafOperation, LeafResult,
    LeafRunner, RunState,
};
pub use docker::DockerDriver;
pub use driver::{select_driver, ContainerState, ContainerSummary, Driver};
pub use mock::MockDriver;
pub use operation::{Operation, OperationOutput, RunSpec};
pub use pool::parallel_map;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("driver '{0}' is not available on this system")]
    DriverUnavailable(String),
    #[error("{operation} is not supported by the {driver} driver")]
    Unsupported { driver: String, operation: String },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("operation '{name}' failed: {message}")]
    OperationFailed { name: String, message: String },
    #[error("malformed driver output: {0}")]
    MalformedOutput(String),
}
