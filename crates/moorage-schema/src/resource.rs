use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of externally managed entities an environment depends on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Container,
    Image,
    Directory,
    Network,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Container => "container",
            ResourceType::Image => "image",
            ResourceType::Directory => "directory",
            ResourceType::Network => "network",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Running,
    Exists,
    Available,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CurrentState {
    Running,
    Stopped,
    Exists,
    Available,
    Missing,
    Outdated,
}

impl fmt::Display for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CurrentState::Running => "running",
            CurrentState::Stopped => "stopped",
            CurrentState::Exists => "exists",
            CurrentState::Available => "available",
            CurrentState::Missing => "missing",
            CurrentState::Outdated => "outdated",
        };
        f.write_str(s)
    }
}

/// Directive attached to a status telling the planner what must happen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrepAction {
    RemoveStoppedContainer,
    RemoveRunningContainer,
    RunNewContainer,
    CreateDirectory,
    BuildOrPullImage,
    CreateNetwork,
}

impl PrepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PrepAction::RemoveStoppedContainer => "remove_stopped_container",
            PrepAction::RemoveRunningContainer => "remove_running_container",
            PrepAction::RunNewContainer => "run_new_container",
            PrepAction::CreateDirectory => "create_directory",
            PrepAction::BuildOrPullImage => "build_or_pull_image",
            PrepAction::CreateNetwork => "create_network",
        }
    }
}

impl fmt::Display for PrepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared need of a workflow, produced by requirement extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirement {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub desired_state: DesiredState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_info: BTreeMap<String, String>,
}

impl ResourceRequirement {
    pub fn new(
        resource_type: ResourceType,
        identifier: impl Into<String>,
        desired_state: DesiredState,
    ) -> Self {
        Self {
            resource_type,
            identifier: identifier.into(),
            desired_state,
            context_info: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context_info.insert(key.to_owned(), value.into());
        self
    }

    pub fn key(&self) -> String {
        resource_key(self.resource_type, &self.identifier)
    }
}

/// Observed state of one resource. Never mutated after creation; the
/// `with_*` helpers consume the status and return a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStatus {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub current_state: CurrentState,
    pub exists: bool,
    pub needs_preparation: bool,
    pub actions: Vec<PrepAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ResourceStatus {
    /// A resource already in its desired state.
    pub fn satisfied(
        resource_type: ResourceType,
        identifier: impl Into<String>,
        current_state: CurrentState,
    ) -> Self {
        Self {
            resource_type,
            identifier: identifier.into(),
            current_state,
            exists: true,
            needs_preparation: false,
            actions: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// A resource that needs the given actions to reach its desired state.
    pub fn unsatisfied(
        resource_type: ResourceType,
        identifier: impl Into<String>,
        current_state: CurrentState,
        exists: bool,
        actions: Vec<PrepAction>,
    ) -> Self {
        Self {
            resource_type,
            identifier: identifier.into(),
            current_state,
            exists,
            needs_preparation: !actions.is_empty(),
            actions,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Derive a new status that needs `actions`, keeping identity and metadata.
    #[must_use]
    pub fn requiring(&self, current_state: CurrentState, actions: Vec<PrepAction>) -> Self {
        Self {
            resource_type: self.resource_type,
            identifier: self.identifier.clone(),
            current_state,
            exists: self.exists,
            needs_preparation: !actions.is_empty(),
            actions,
            metadata: self.metadata.clone(),
        }
    }

    pub fn has_action(&self, action: PrepAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn key(&self) -> String {
        resource_key(self.resource_type, &self.identifier)
    }
}

/// Statuses keyed by [`resource_key`], so a container and an image that
/// happen to share a name never collide.
pub type StatusMap = BTreeMap<String, ResourceStatus>;

pub fn resource_key(resource_type: ResourceType, identifier: &str) -> String {
    format!("{resource_type}:{identifier}")
}
