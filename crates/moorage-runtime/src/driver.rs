use crate::operation::{Operation, OperationOutput};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSummary {
    pub name: String,
    pub state: ContainerState,
}

/// The execution capability the engine orchestrates through.
///
/// `execute` returns `Err` only when the operation could not be attempted
/// at all; a command that ran and failed is an `Ok` output with
/// `success == false`.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn execute(&self, operation: &Operation) -> Result<OperationOutput, RuntimeError>;

    /// Low-level inspect document of a container, `None` when it does not exist.
    fn inspect_container(&self, name: &str) -> Result<Option<serde_json::Value>, RuntimeError>;

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    fn network_exists(&self, _name: &str) -> Result<bool, RuntimeError> {
        Err(RuntimeError::Unsupported {
            driver: self.name().to_owned(),
            operation: "network inspection".to_owned(),
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub fn select_driver(name: &str) -> Result<Box<dyn Driver>, RuntimeError> {
    match name {
        "docker" => Ok(Box::new(crate::docker::DockerDriver::new())),
        "mock" => Ok(Box::new(crate::mock::MockDriver::new())),
        other => Err(RuntimeError::DriverUnavailable(other.to_owned())),
    }
}
