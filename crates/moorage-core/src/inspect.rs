use crate::extract::extract_requirements;
use crate::CoreError;
use moorage_runtime::{ContainerState, Driver};
use moorage_schema::{
    CurrentState, DesiredState, EngineConfig, EnvContext, EnvNames, PrepAction,
    ResourceRequirement, ResourceStatus, ResourceType, StatusMap, Step,
};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// Observes the current state of the resources an environment needs.
///
/// Every inspection is independent of the others; callers decide what an
/// error in one category means for the rest.
pub trait ResourceInspector: Send + Sync {
    fn extract_requirements(&self, steps: &[Step]) -> Vec<ResourceRequirement>;

    fn inspect_containers(
        &self,
        driver: &dyn Driver,
        requirements: &[ResourceRequirement],
    ) -> Result<StatusMap, CoreError>;

    fn inspect_directories(
        &self,
        driver: &dyn Driver,
        paths: &[PathBuf],
    ) -> Result<StatusMap, CoreError>;

    fn inspect_images(&self, driver: &dyn Driver, images: &[String])
        -> Result<StatusMap, CoreError>;

    fn inspect_networks(
        &self,
        driver: &dyn Driver,
        requirements: &[ResourceRequirement],
    ) -> Result<StatusMap, CoreError>;
}

pub struct DockerInspector {
    names: EnvNames,
}

impl DockerInspector {
    pub fn new(ctx: &EnvContext, config: &EngineConfig) -> Self {
        Self {
            names: ctx.names(&config.naming),
        }
    }

    fn container_image(driver: &dyn Driver, name: &str) -> Option<String> {
        match driver.inspect_container(name) {
            Ok(Some(info)) => info
                .pointer("/Config/Image")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned),
            Ok(None) => None,
            Err(e) => {
                debug!("could not inspect container {name}: {e}");
                None
            }
        }
    }
}

fn insert(map: &mut StatusMap, status: ResourceStatus) {
    map.insert(status.key(), status);
}

impl ResourceInspector for DockerInspector {
    /// Step-derived requirements plus the image each required container runs from.
    fn extract_requirements(&self, steps: &[Step]) -> Vec<ResourceRequirement> {
        let mut reqs = extract_requirements(steps);
        let mut seen: HashSet<String> = reqs.iter().map(ResourceRequirement::key).collect();
        let images: Vec<ResourceRequirement> = reqs
            .iter()
            .filter(|r| r.resource_type == ResourceType::Container)
            .map(|r| {
                ResourceRequirement::new(
                    ResourceType::Image,
                    self.names.image_for_container(&r.identifier),
                    DesiredState::Available,
                )
                .with_context("container", r.identifier.clone())
            })
            .collect();
        for image in images {
            if seen.insert(image.key()) {
                reqs.push(image);
            }
        }
        reqs
    }

    fn inspect_containers(
        &self,
        driver: &dyn Driver,
        requirements: &[ResourceRequirement],
    ) -> Result<StatusMap, CoreError> {
        let mut out = StatusMap::new();
        if requirements.is_empty() {
            return Ok(out);
        }
        let present: BTreeMap<String, ContainerState> = driver
            .list_containers(true)?
            .into_iter()
            .map(|c| (c.name, c.state))
            .collect();

        for req in requirements {
            let name = req.identifier.as_str();
            let status = match present.get(name) {
                Some(ContainerState::Running) => {
                    ResourceStatus::satisfied(ResourceType::Container, name, CurrentState::Running)
                }
                Some(ContainerState::Stopped) => ResourceStatus::unsatisfied(
                    ResourceType::Container,
                    name,
                    CurrentState::Stopped,
                    true,
                    vec![PrepAction::RemoveStoppedContainer, PrepAction::RunNewContainer],
                ),
                None => ResourceStatus::unsatisfied(
                    ResourceType::Container,
                    name,
                    CurrentState::Missing,
                    false,
                    vec![PrepAction::RunNewContainer],
                ),
            };
            let image = if status.exists {
                Self::container_image(driver, name)
            } else {
                None
            };
            let status = match image {
                Some(image) => status.with_metadata("image", image),
                None => status,
            };
            debug!("container {name}: {}", status.current_state);
            insert(&mut out, status);
        }
        Ok(out)
    }

    fn inspect_directories(
        &self,
        driver: &dyn Driver,
        paths: &[PathBuf],
    ) -> Result<StatusMap, CoreError> {
        let mut out = StatusMap::new();
        for path in paths {
            let id = path.display().to_string();
            let status = if driver.path_exists(path) {
                ResourceStatus::satisfied(ResourceType::Directory, id, CurrentState::Exists)
            } else {
                ResourceStatus::unsatisfied(
                    ResourceType::Directory,
                    id,
                    CurrentState::Missing,
                    false,
                    vec![PrepAction::CreateDirectory],
                )
            };
            insert(&mut out, status);
        }
        Ok(out)
    }

    fn inspect_images(
        &self,
        driver: &dyn Driver,
        images: &[String],
    ) -> Result<StatusMap, CoreError> {
        let mut out = StatusMap::new();
        for image in images {
            let status = if driver.image_exists(image)? {
                ResourceStatus::satisfied(ResourceType::Image, image, CurrentState::Available)
            } else {
                ResourceStatus::unsatisfied(
                    ResourceType::Image,
                    image,
                    CurrentState::Missing,
                    false,
                    vec![PrepAction::BuildOrPullImage],
                )
            };
            insert(&mut out, status);
        }
        Ok(out)
    }

    fn inspect_networks(
        &self,
        driver: &dyn Driver,
        requirements: &[ResourceRequirement],
    ) -> Result<StatusMap, CoreError> {
        let mut out = StatusMap::new();
        for req in requirements {
            let name = req.identifier.as_str();
            let status = if driver.network_exists(name)? {
                ResourceStatus::satisfied(ResourceType::Network, name, CurrentState::Exists)
            } else {
                ResourceStatus::unsatisfied(
                    ResourceType::Network,
                    name,
                    CurrentState::Missing,
                    false,
                    vec![PrepAction::CreateNetwork],
                )
            };
            insert(&mut out, status);
        }
        Ok(out)
    }
}
