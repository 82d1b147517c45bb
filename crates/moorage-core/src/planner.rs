//! Diffing observed state into preparation tasks.

use crate::task::{dependency_batches, PreparationTask, TaskBatch, TaskType};
use moorage_runtime::{CompositeOperation, Operation, RunSpec};
use moorage_schema::{
    ContainerConfig, CurrentState, EngineConfig, EnvContext, EnvNames, PrepAction,
    RebuildDecision, ResourceStatus, ResourceType, StatusMap, TaskId,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

pub const MKDIR_GROUP: &str = "mkdir_preparation";
pub const IMAGE_GROUP: &str = "image_preparation";
pub const NETWORK_GROUP: &str = "network_preparation";
pub const DOCKER_GROUP: &str = "docker_preparation";

pub trait TaskPlanner: Send + Sync {
    /// New statuses with the fingerprint decision folded into their actions.
    fn apply_rebuild_decision(&self, statuses: &StatusMap, decision: &RebuildDecision)
        -> StatusMap;

    /// Tasks for every status that needs preparation.
    fn generate_tasks(&self, statuses: &StatusMap) -> Vec<PreparationTask>;

    fn sort_tasks(&self, tasks: &[PreparationTask]) -> Vec<PreparationTask> {
        crate::task::sort_tasks(tasks)
    }

    fn schedule(&self, tasks: &[PreparationTask]) -> Vec<TaskBatch> {
        dependency_batches(tasks)
    }

    fn convert_to_executable(&self, tasks: &[PreparationTask]) -> CompositeOperation;
}

pub struct DockerPlanner {
    names: EnvNames,
    definition: Option<String>,
    oj_definition: Option<String>,
    project_path: Option<PathBuf>,
    container: ContainerConfig,
    max_workers: usize,
    parallel_groups: bool,
}

impl DockerPlanner {
    pub fn new(ctx: &EnvContext, config: &EngineConfig) -> Self {
        Self {
            names: ctx.names(&config.naming),
            definition: ctx.definition.clone(),
            oj_definition: ctx.oj_definition.clone(),
            project_path: ctx.project_path.clone(),
            container: config.container.clone(),
            max_workers: config.execution.max_workers,
            parallel_groups: config.execution.parallel_groups,
        }
    }

    fn is_own_container(&self, name: &str) -> bool {
        name == self.names.container || name == self.names.oj_container
    }

    fn definition_for(&self, image: &str) -> Option<&str> {
        if image == self.names.image {
            self.definition.as_deref()
        } else if image == self.names.oj_image {
            self.oj_definition.as_deref()
        } else {
            None
        }
    }

    fn image_task(&self, id: TaskId, status: &ResourceStatus) -> PreparationTask {
        let image = status.identifier.clone();
        let task = match self.definition_for(&image) {
            Some(definition) => PreparationTask::new(
                id,
                TaskType::DockerBuild,
                Operation::BuildImage {
                    image: image.clone(),
                    definition: definition.to_owned(),
                    context: self.project_path.clone(),
                },
                format!("Build image {image}"),
            ),
            None => PreparationTask::new(
                id,
                TaskType::ImagePull,
                Operation::PullImage {
                    image: image.clone(),
                },
                format!("Pull image {image}"),
            ),
        };
        task.in_group(IMAGE_GROUP)
    }

    fn run_spec(&self, name: &str) -> RunSpec {
        let mounts = self
            .project_path
            .iter()
            .map(|p| (p.display().to_string(), self.container.mount_path.clone()))
            .collect();
        RunSpec {
            image: self.names.image_for_container(name).to_owned(),
            name: name.to_owned(),
            command: self.container.keep_alive_command.clone(),
            mounts,
            working_dir: Some(self.container.working_directory.clone()),
            memory_limit: self.container.memory_limit.clone(),
            cpu_limit: self.container.cpu_limit.clone(),
            network: None,
        }
    }
}

struct IdGen(u32);

impl IdGen {
    fn next(&mut self, task_type: TaskType) -> TaskId {
        self.0 += 1;
        TaskId::new(format!("{}_{:03}", task_type.as_str(), self.0))
    }
}

fn of_type(statuses: &StatusMap, ty: ResourceType) -> impl Iterator<Item = &ResourceStatus> {
    statuses
        .values()
        .filter(move |s| s.resource_type == ty && s.needs_preparation)
}

impl TaskPlanner for DockerPlanner {
    fn apply_rebuild_decision(
        &self,
        statuses: &StatusMap,
        decision: &RebuildDecision,
    ) -> StatusMap {
        statuses
            .iter()
            .map(|(key, status)| {
                let updated = match status.resource_type {
                    ResourceType::Image if status.exists => {
                        let rebuild = (status.identifier == self.names.image
                            && decision.image_rebuild_needed)
                            || (status.identifier == self.names.oj_image
                                && decision.oj_image_rebuild_needed);
                        rebuild.then(|| {
                            status.requiring(CurrentState::Outdated, vec![PrepAction::BuildOrPullImage])
                        })
                    }
                    ResourceType::Container
                        if status.exists && self.is_own_container(&status.identifier) =>
                    {
                        let name = status.identifier.as_str();
                        let flagged = if self.names.is_oj_container(name) {
                            decision.oj_container_recreate_needed
                        } else {
                            decision.container_recreate_needed
                        };
                        let expected = self.names.image_for_container(name);
                        let mismatched = status
                            .metadata
                            .get("image")
                            .is_some_and(|image| image != expected);
                        if mismatched {
                            debug!("container {name} runs from an unexpected image; recreating");
                        }
                        (flagged || mismatched).then(|| {
                            let remove = if status.current_state == CurrentState::Running {
                                PrepAction::RemoveRunningContainer
                            } else {
                                PrepAction::RemoveStoppedContainer
                            };
                            status.requiring(
                                status.current_state,
                                vec![remove, PrepAction::RunNewContainer],
                            )
                        })
                    }
                    _ => None,
                };
                (key.clone(), updated.unwrap_or_else(|| status.clone()))
            })
            .collect()
    }

    fn generate_tasks(&self, statuses: &StatusMap) -> Vec<PreparationTask> {
        let mut ids = IdGen(0);
        let mut tasks = Vec::new();

        for status in of_type(statuses, ResourceType::Directory) {
            if status.has_action(PrepAction::CreateDirectory) {
                let path = status.identifier.as_str();
                tasks.push(
                    PreparationTask::new(
                        ids.next(TaskType::Mkdir),
                        TaskType::Mkdir,
                        Operation::mkdir(path),
                        format!("Create directory {path}"),
                    )
                    .in_group(MKDIR_GROUP)
                    .with_metadata("resource", status.key()),
                );
            }
        }

        let mut image_tasks: BTreeMap<&str, TaskId> = BTreeMap::new();
        for status in of_type(statuses, ResourceType::Image) {
            if status.has_action(PrepAction::BuildOrPullImage) {
                let id = ids.next(if self.definition_for(&status.identifier).is_some() {
                    TaskType::DockerBuild
                } else {
                    TaskType::ImagePull
                });
                image_tasks.insert(status.identifier.as_str(), id.clone());
                tasks.push(self.image_task(id, status).with_metadata("resource", status.key()));
            }
        }

        for status in of_type(statuses, ResourceType::Network) {
            if status.has_action(PrepAction::CreateNetwork) {
                let name = status.identifier.clone();
                tasks.push(
                    PreparationTask::new(
                        ids.next(TaskType::NetworkCreate),
                        TaskType::NetworkCreate,
                        Operation::CreateNetwork { name: name.clone() },
                        format!("Create network {name}"),
                    )
                    .in_group(NETWORK_GROUP)
                    .with_metadata("resource", status.key()),
                );
            }
        }

        for status in of_type(statuses, ResourceType::Container) {
            let name = status.identifier.as_str();
            let mut remove_id = None;
            if status.has_action(PrepAction::RemoveStoppedContainer)
                || status.has_action(PrepAction::RemoveRunningContainer)
            {
                let id = ids.next(TaskType::DockerRemove);
                remove_id = Some(id.clone());
                tasks.push(
                    PreparationTask::new(
                        id,
                        TaskType::DockerRemove,
                        Operation::RemoveContainer {
                            name: name.to_owned(),
                            force: true,
                        },
                        format!("Remove container {name}"),
                    )
                    .in_group(DOCKER_GROUP)
                    .with_metadata("resource", status.key()),
                );
            }
            if status.has_action(PrepAction::RunNewContainer) {
                let spec = self.run_spec(name);
                let mut run = PreparationTask::new(
                    ids.next(TaskType::DockerRun),
                    TaskType::DockerRun,
                    Operation::RunContainer(spec.clone()),
                    format!("Run container {name} from {}", spec.image),
                )
                .in_group(DOCKER_GROUP)
                .with_metadata("resource", status.key())
                .with_metadata("image", spec.image.clone());
                if let Some(id) = &remove_id {
                    run = run.depends_on(id);
                }
                if let Some(id) = image_tasks.get(spec.image.as_str()) {
                    run = run.depends_on(id);
                }
                tasks.push(run);
            }
        }

        debug!("generated {} preparation task(s)", tasks.len());
        tasks
    }

    fn convert_to_executable(&self, tasks: &[PreparationTask]) -> CompositeOperation {
        // Every leaf allows failure: one failed task never stops the others.
        let leaf = |t: PreparationTask| {
            CompositeOperation::leaf(t.task_id.into_inner(), t.operation).allowing_failure()
        };
        if !self.parallel_groups {
            let leaves = self.sort_tasks(tasks).into_iter().map(leaf).collect();
            return CompositeOperation::sequential("preparation", leaves);
        }

        let children = self
            .schedule(tasks)
            .into_iter()
            .map(|batch| {
                let parallel = batch.is_parallel();
                let mut leaves: Vec<CompositeOperation> =
                    batch.tasks.into_iter().map(leaf).collect();
                match batch.group {
                    Some(group) if parallel => {
                        CompositeOperation::parallel(group, self.max_workers, leaves)
                    }
                    _ => leaves.pop().unwrap_or_else(|| {
                        CompositeOperation::sequential("empty", Vec::new())
                    }),
                }
            })
            .collect();
        CompositeOperation::sequential("preparation", children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::sort_tasks;
    use moorage_runtime::{ExecutionMode, LeafOperation};

    fn ctx() -> EnvContext {
        EnvContext::new("python", "docker")
            .with_definition("FROM python:3.12\n")
            .with_project_path("/home/dev/project")
    }

    fn planner() -> DockerPlanner {
        DockerPlanner::new(&ctx(), &EngineConfig::default())
    }

    fn missing(ty: ResourceType, id: &str, action: PrepAction) -> ResourceStatus {
        ResourceStatus::unsatisfied(ty, id, CurrentState::Missing, false, vec![action])
    }

    fn map(statuses: Vec<ResourceStatus>) -> StatusMap {
        statuses.into_iter().map(|s| (s.key(), s)).collect()
    }

    fn fresh_environment() -> StatusMap {
        map(vec![
            missing(
                ResourceType::Container,
                "moorage-python-container",
                PrepAction::RunNewContainer,
            ),
            missing(ResourceType::Image, "moorage-python", PrepAction::BuildOrPullImage),
            missing(ResourceType::Image, "alpine", PrepAction::BuildOrPullImage),
            missing(ResourceType::Directory, "/tmp/a", PrepAction::CreateDirectory),
            missing(ResourceType::Network, "net", PrepAction::CreateNetwork),
            ResourceStatus::satisfied(ResourceType::Directory, "/tmp/ok", CurrentState::Exists),
        ])
    }

    #[test]
    fn one_task_per_missing_resource_with_sequential_ids() {
        let tasks = planner().generate_tasks(&fresh_environment());
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "mkdir_001",
                "image_pull_002",
                "docker_build_003",
                "network_create_004",
                "docker_run_005",
            ]
        );
    }

    #[test]
    fn run_depends_on_its_image_and_carries_container_settings() {
        let tasks = planner().generate_tasks(&fresh_environment());
        let run = tasks
            .iter()
            .find(|t| t.task_type == TaskType::DockerRun)
            .unwrap();
        assert!(run.dependencies.contains(&TaskId::new("docker_build_003")));
        assert_eq!(run.parallel_group.as_deref(), Some(DOCKER_GROUP));
        let Operation::RunContainer(spec) = &run.operation else {
            panic!("expected run_container, got {}", run.operation);
        };
        assert_eq!(spec.image, "moorage-python");
        assert_eq!(spec.command, "tail -f /dev/null");
        assert_eq!(
            spec.mounts,
            [("/home/dev/project".to_owned(), "/workspace".to_owned())]
        );
        assert_eq!(spec.working_dir.as_deref(), Some("/workspace"));

        let sorted = sort_tasks(&tasks);
        let pos = |id: &str| sorted.iter().position(|t| t.task_id == id).unwrap();
        assert!(pos("docker_build_003") < pos("docker_run_005"));
    }

    #[test]
    fn stopped_container_is_removed_before_run() {
        let statuses = map(vec![ResourceStatus::unsatisfied(
            ResourceType::Container,
            "sidecar",
            CurrentState::Stopped,
            true,
            vec![PrepAction::RemoveStoppedContainer, PrepAction::RunNewContainer],
        )]);
        let tasks = planner().generate_tasks(&statuses);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_type, TaskType::DockerRemove);
        assert!(matches!(
            tasks[0].operation,
            Operation::RemoveContainer { force: true, .. }
        ));
        assert!(tasks[1].dependencies.contains(&tasks[0].task_id));
    }

    #[test]
    fn rebuild_decision_marks_images_and_own_containers() {
        let statuses = map(vec![
            ResourceStatus::satisfied(ResourceType::Image, "moorage-python", CurrentState::Available),
            ResourceStatus::satisfied(ResourceType::Image, "alpine", CurrentState::Available),
            ResourceStatus::satisfied(
                ResourceType::Container,
                "moorage-python-container",
                CurrentState::Running,
            ),
            ResourceStatus::satisfied(ResourceType::Container, "sidecar", CurrentState::Running),
        ]);
        let decision = RebuildDecision::everything("no previous state");
        let updated = planner().apply_rebuild_decision(&statuses, &decision);

        let image = &updated["image:moorage-python"];
        assert_eq!(image.current_state, CurrentState::Outdated);
        assert_eq!(image.actions, [PrepAction::BuildOrPullImage]);
        assert!(!updated["image:alpine"].needs_preparation);

        let own = &updated["container:moorage-python-container"];
        assert_eq!(
            own.actions,
            [PrepAction::RemoveRunningContainer, PrepAction::RunNewContainer]
        );
        assert!(!updated["container:sidecar"].needs_preparation);

        // Input statuses are untouched.
        assert!(!statuses["image:moorage-python"].needs_preparation);
    }

    #[test]
    fn image_mismatch_recreates_container_without_decision() {
        let statuses = map(vec![ResourceStatus::satisfied(
            ResourceType::Container,
            "moorage-python-container",
            CurrentState::Running,
        )
        .with_metadata("image", "python:3.8")]);
        let updated = planner().apply_rebuild_decision(&statuses, &RebuildDecision::nothing());
        assert!(updated["container:moorage-python-container"].needs_preparation);

        let matching = map(vec![ResourceStatus::satisfied(
            ResourceType::Container,
            "moorage-python-container",
            CurrentState::Running,
        )
        .with_metadata("image", "moorage-python")]);
        let unchanged = planner().apply_rebuild_decision(&matching, &RebuildDecision::nothing());
        assert!(!unchanged["container:moorage-python-container"].needs_preparation);
    }

    #[test]
    fn executable_wraps_groups_in_parallel_composites() {
        let p = planner();
        let tasks = p.generate_tasks(&fresh_environment());
        let exe = p.convert_to_executable(&tasks);
        assert_eq!(exe.count_leaves(), tasks.len());

        let CompositeOperation::Group { mode, children, .. } = &exe else {
            panic!("expected a group");
        };
        assert_eq!(*mode, ExecutionMode::Sequential);
        let images = children
            .iter()
            .find(|c| c.name() == IMAGE_GROUP)
            .unwrap();
        assert!(matches!(
            images,
            CompositeOperation::Group {
                mode: ExecutionMode::Parallel { max_workers: 4 },
                ..
            }
        ));
        assert_eq!(images.count_leaves(), 2);
    }

    fn leaves(op: &CompositeOperation) -> Vec<&LeafOperation> {
        match op {
            CompositeOperation::Leaf(leaf) => vec![leaf],
            CompositeOperation::Group { children, .. } => children.iter().flat_map(leaves).collect(),
        }
    }

    #[test]
    fn executable_leaves_allow_failure_and_carry_task_ids() {
        let p = planner();
        let tasks = p.generate_tasks(&fresh_environment());
        let exe = p.convert_to_executable(&tasks);
        let leaves = leaves(&exe);
        assert!(leaves.iter().all(|l| l.allow_failure));
        let sorted = sort_tasks(&tasks);
        let names: Vec<&str> = leaves.iter().map(|l| l.name.as_str()).collect();
        let ids: Vec<&str> = sorted.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(names, ids);
    }

    #[test]
    fn executable_is_flat_when_parallel_groups_are_disabled() {
        let mut config = EngineConfig::default();
        config.execution.parallel_groups = false;
        let p = DockerPlanner::new(&ctx(), &config);
        let tasks = p.generate_tasks(&fresh_environment());
        let CompositeOperation::Group { mode, children, .. } = p.convert_to_executable(&tasks) else {
            panic!("expected a group");
        };
        assert_eq!(mode, ExecutionMode::Sequential);
        assert_eq!(children.len(), tasks.len());
        assert!(children.iter().all(|c| matches!(c, CompositeOperation::Leaf(_))));
    }

    #[test]
    fn nothing_to_prepare_yields_no_tasks() {
        let statuses = map(vec![ResourceStatus::satisfied(
            ResourceType::Directory,
            "/tmp",
            CurrentState::Exists,
        )]);
        let p = planner();
        let tasks = p.generate_tasks(&statuses);
        assert!(tasks.is_empty());
        assert_eq!(p.convert_to_executable(&tasks).count_leaves(), 0);
    }
}
