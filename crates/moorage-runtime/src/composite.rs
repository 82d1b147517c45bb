//! Tree-structured execution of atomic operations.
//!
//! A [`CompositeOperation`] is either a leaf wrapping one [`Operation`] or a
//! group of children run in a [`ExecutionMode`]:
//!
//! - `Sequential`: children run in list order, one at a time. The first
//!   failing leaf that does not allow failure stops the group.
//! - `Parallel`: children run on a bounded worker pool. Results keep the
//!   submission order and every child runs to completion; the first error in
//!   submission order is reported after all of them finish.
//!
//! The executor performs no retries of its own.

use crate::driver::Driver;
use crate::operation::{Operation, OperationOutput};
use crate::pool::parallel_map;
use crate::RuntimeError;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { max_workers: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafOperation {
    pub name: String,
    pub operation: Operation,
    pub allow_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeOperation {
    Leaf(LeafOperation),
    Group {
        name: String,
        mode: ExecutionMode,
        children: Vec<CompositeOperation>,
    },
}

impl CompositeOperation {
    pub fn leaf(name: impl Into<String>, operation: Operation) -> Self {
        CompositeOperation::Leaf(LeafOperation {
            name: name.into(),
            operation,
            allow_failure: false,
        })
    }

    /// Mark a leaf so that its failure does not stop a sequential group.
    #[must_use]
    pub fn allowing_failure(self) -> Self {
        match self {
            CompositeOperation::Leaf(mut leaf) => {
                leaf.allow_failure = true;
                CompositeOperation::Leaf(leaf)
            }
            group => group,
        }
    }

    pub fn sequential(name: impl Into<String>, children: Vec<CompositeOperation>) -> Self {
        CompositeOperation::Group {
            name: name.into(),
            mode: ExecutionMode::Sequential,
            children,
        }
    }

    pub fn parallel(
        name: impl Into<String>,
        max_workers: usize,
        children: Vec<CompositeOperation>,
    ) -> Self {
        CompositeOperation::Group {
            name: name.into(),
            mode: ExecutionMode::Parallel { max_workers },
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CompositeOperation::Leaf(leaf) => &leaf.name,
            CompositeOperation::Group { name, .. } => name,
        }
    }

    /// Number of atomic operations in the tree.
    pub fn count_leaves(&self) -> usize {
        match self {
            CompositeOperation::Leaf(_) => 1,
            CompositeOperation::Group { children, .. } => {
                children.iter().map(CompositeOperation::count_leaves).sum()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LeafResult {
    pub name: String,
    pub output: OperationOutput,
}

#[derive(Debug)]
pub struct CompositeRun {
    pub state: RunState,
    /// One entry per executed leaf, in tree order. A leaf the driver could
    /// not run gets a failed placeholder output.
    pub results: Vec<LeafResult>,
    pub error: Option<RuntimeError>,
}

impl CompositeRun {
    fn pending() -> Self {
        Self {
            state: RunState::Pending,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.output.success).count()
    }

    pub fn into_result(self) -> Result<Vec<LeafResult>, RuntimeError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

struct Outcome {
    results: Vec<LeafResult>,
    error: Option<RuntimeError>,
}

/// Runs a single leaf. The executor calls the driver directly unless a
/// runner is supplied, which lets callers wrap leaves in retries.
pub trait LeafRunner: Sync {
    fn run_leaf(&self, leaf: &LeafOperation) -> Result<OperationOutput, RuntimeError>;
}

enum Runner<'a> {
    Driver(&'a dyn Driver),
    Custom(&'a dyn LeafRunner),
}

pub struct CompositeExecutor<'a> {
    runner: Runner<'a>,
}

impl<'a> CompositeExecutor<'a> {
    pub fn new(driver: &'a dyn Driver) -> Self {
        Self {
            runner: Runner::Driver(driver),
        }
    }

    pub fn with_runner(runner: &'a dyn LeafRunner) -> Self {
        Self {
            runner: Runner::Custom(runner),
        }
    }

    pub fn run(&self, operation: &CompositeOperation) -> CompositeRun {
        let mut run = CompositeRun::pending();
        debug!(
            "composite '{}': {:?} -> running ({} leaves)",
            operation.name(),
            run.state,
            operation.count_leaves()
        );
        run.state = RunState::Running;

        let outcome = self.exec(operation);
        run.results = outcome.results;
        run.state = if outcome.error.is_some() {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        run.error = outcome.error;
        debug!("composite '{}': {:?}", operation.name(), run.state);
        run
    }

    fn exec(&self, operation: &CompositeOperation) -> Outcome {
        match operation {
            CompositeOperation::Leaf(leaf) => self.exec_leaf(leaf),
            CompositeOperation::Group {
                mode: ExecutionMode::Sequential,
                children,
                ..
            } => self.exec_sequential(children),
            CompositeOperation::Group {
                mode: ExecutionMode::Parallel { max_workers },
                children,
                ..
            } => self.exec_parallel(children, *max_workers),
        }
    }

    fn exec_leaf(&self, leaf: &LeafOperation) -> Outcome {
        let executed = match self.runner {
            Runner::Driver(driver) => driver.execute(&leaf.operation),
            Runner::Custom(runner) => runner.run_leaf(leaf),
        };
        match executed {
            Ok(output) => {
                let error = if output.success {
                    None
                } else if leaf.allow_failure {
                    warn!(
                        "'{}' failed (allowed): {}",
                        leaf.name,
                        output.error_text()
                    );
                    None
                } else {
                    Some(RuntimeError::OperationFailed {
                        name: leaf.name.clone(),
                        message: output.error_text(),
                    })
                };
                Outcome {
                    results: vec![LeafResult {
                        name: leaf.name.clone(),
                        output,
                    }],
                    error,
                }
            }
            Err(e) => {
                warn!("'{}' could not be executed: {e}", leaf.name);
                Outcome {
                    results: vec![LeafResult {
                        name: leaf.name.clone(),
                        output: OperationOutput::failed(e.to_string()),
                    }],
                    error: Some(e),
                }
            }
        }
    }

    fn exec_sequential(&self, children: &[CompositeOperation]) -> Outcome {
        let mut results = Vec::new();
        for child in children {
            let outcome = self.exec(child);
            results.extend(outcome.results);
            if outcome.error.is_some() {
                return Outcome {
                    results,
                    error: outcome.error,
                };
            }
        }
        Outcome {
            results,
            error: None,
        }
    }

    fn exec_parallel(&self, children: &[CompositeOperation], max_workers: usize) -> Outcome {
        let outcomes = parallel_map(children.iter().collect(), max_workers, |child| {
            self.exec(child)
        });
        let mut results = Vec::new();
        let mut error = None;
        for outcome in outcomes {
            results.extend(outcome.results);
            if error.is_none() {
                error = outcome.error;
            }
        }
        Outcome { results, error }
    }
}
