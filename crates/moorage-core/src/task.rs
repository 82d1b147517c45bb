//! Preparation tasks and their dependency ordering.

use moorage_runtime::Operation;
use moorage_schema::TaskId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Mkdir,
    DockerBuild,
    ImagePull,
    DockerRemove,
    DockerRun,
    NetworkCreate,
}

impl TaskType {
    /// Prefix of generated task ids.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Mkdir => "mkdir",
            TaskType::DockerBuild => "docker_build",
            TaskType::ImagePull => "image_pull",
            TaskType::DockerRemove => "docker_remove",
            TaskType::DockerRun => "docker_run",
            TaskType::NetworkCreate => "network_create",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreparationTask {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub operation: Operation,
    pub dependencies: BTreeSet<TaskId>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl PreparationTask {
    pub fn new(
        task_id: impl Into<TaskId>,
        task_type: TaskType,
        operation: Operation,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type,
            operation,
            dependencies: BTreeSet::new(),
            description: description.into(),
            parallel_group: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, task_id: &TaskId) -> Self {
        self.dependencies.insert(task_id.clone());
        self
    }

    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}

/// Tasks that may run at the same time: one wave of ready tasks sharing a
/// parallel group, or a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBatch {
    pub tasks: Vec<PreparationTask>,
    pub group: Option<String>,
}

impl TaskBatch {
    fn single(task: PreparationTask) -> Self {
        Self {
            tasks: vec![task],
            group: None,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.group.is_some() && self.tasks.len() > 1
    }
}

/// Split `tasks` into dependency-respecting batches.
///
/// Each round takes every unscheduled task whose dependencies are already
/// scheduled. Ready tasks of the same group form one batch, groups ordered by
/// first appearance and placed before ungrouped ready tasks. Dependencies on
/// ids that are not in `tasks` are ignored. If nothing is ready the remaining
/// tasks are appended as single batches in their original order.
pub fn dependency_batches(tasks: &[PreparationTask]) -> Vec<TaskBatch> {
    let known: HashSet<&TaskId> = tasks.iter().map(|t| &t.task_id).collect();
    for task in tasks {
        for dep in task.dependencies.iter().filter(|d| !known.contains(d)) {
            warn!("task {} depends on unknown task {dep}; ignoring", task.task_id);
        }
    }

    let mut scheduled: HashSet<&TaskId> = HashSet::new();
    let mut remaining: Vec<&PreparationTask> = tasks.iter().collect();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|t| {
            t.dependencies
                .iter()
                .all(|d| scheduled.contains(d) || !known.contains(d))
        });

        if ready.is_empty() {
            let ids: Vec<&str> = blocked.iter().map(|t| t.task_id.as_str()).collect();
            warn!(
                "dependency cycle among tasks [{}]; falling back to declaration order",
                ids.join(", ")
            );
            batches.extend(blocked.into_iter().map(|t| TaskBatch::single(t.clone())));
            break;
        }

        let mut grouped: Vec<TaskBatch> = Vec::new();
        let mut ungrouped: Vec<TaskBatch> = Vec::new();
        for task in &ready {
            match &task.parallel_group {
                Some(group) => {
                    if let Some(batch) = grouped
                        .iter_mut()
                        .find(|b| b.group.as_ref() == Some(group))
                    {
                        batch.tasks.push((*task).clone());
                    } else {
                        grouped.push(TaskBatch {
                            tasks: vec![(*task).clone()],
                            group: Some(group.clone()),
                        });
                    }
                }
                None => ungrouped.push(TaskBatch::single((*task).clone())),
            }
        }
        batches.extend(grouped);
        batches.extend(ungrouped);

        scheduled.extend(ready.iter().map(|t| &t.task_id));
        remaining = blocked;
    }
    batches
}

/// Flattened [`dependency_batches`].
pub fn sort_tasks(tasks: &[PreparationTask]) -> Vec<PreparationTask> {
    dependency_batches(tasks)
        .into_iter()
        .flat_map(|b| b.tasks)
        .collect()
}
