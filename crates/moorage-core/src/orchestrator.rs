//! The reconciliation pipeline.
//!
//! `prepare` resolves a provider bundle for the context's environment type,
//! compares fingerprints, extracts requirements, inspects the four resource
//! categories concurrently, plans and orders tasks, and hands the resulting
//! composite to the executor. Every leaf runs through its own retry loop and
//! a failed task never stops the tasks after it.
//! Fingerprints are only written after a run in which every task succeeded.
//!
//! Concurrent runs for the same `(language, env_type)` must be serialized by
//! the caller (the CLI holds the store lock).

use crate::classify::{ErrorReport, FailureClassifier};
use crate::inspect::ResourceInspector;
use crate::registry::ProviderRegistry;
use crate::task::{PreparationTask, TaskType};
use crate::CoreError;
use moorage_runtime::{
    CompositeExecutor, Driver, LeafOperation, LeafRunner, OperationOutput, RuntimeError,
};
use moorage_schema::{
    EngineConfig, EnvContext, RebuildDecision, ResourceRequirement, ResourceType, StatusMap,
    Step, TaskId,
};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Blocking pause between attempts of one task.
pub type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub description: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreparationResult {
    pub success: bool,
    pub tasks: Vec<PreparationTask>,
    pub successful_tasks: Vec<TaskId>,
    pub failed_tasks: Vec<TaskId>,
    pub error_messages: Vec<String>,
    pub statuses: StatusMap,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// `None` when the run was aborted before fingerprints were compared.
    pub decision: Option<RebuildDecision>,
    pub report: Option<ErrorReport>,
    pub outcomes: Vec<TaskOutcome>,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl PreparationResult {
    fn aborted(message: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            tasks: Vec::new(),
            successful_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            error_messages: vec![message],
            statuses: StatusMap::new(),
            elapsed,
            decision: None,
            report: None,
            outcomes: Vec::new(),
        }
    }
}

pub struct Orchestrator {
    registry: ProviderRegistry,
    config: EngineConfig,
    sleeper: Sleeper,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            sleeper: Box::new(thread::sleep),
        }
    }

    /// Replace the pause between retries. Tests use this to record delays.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rebuild_decision(&self, ctx: &EnvContext) -> Result<RebuildDecision, CoreError> {
        let bundle = self.registry.get(&ctx.env_type, ctx, &self.config)?;
        Ok(bundle.store.check_rebuild_needed(ctx))
    }

    /// Run [`Orchestrator::prepare`] only when the fingerprint says something changed.
    pub fn prepare_if_needed(
        &self,
        ctx: &EnvContext,
        steps: &[Step],
        driver: &dyn Driver,
    ) -> Option<PreparationResult> {
        match self.rebuild_decision(ctx) {
            Ok(decision) if !decision.any_action_needed() => {
                info!(
                    "{} is up to date ({}); skipping preparation",
                    ctx.state_key(),
                    decision.reason
                );
                None
            }
            _ => Some(self.prepare(ctx, steps, driver)),
        }
    }

    pub fn prepare(&self, ctx: &EnvContext, steps: &[Step], driver: &dyn Driver) -> PreparationResult {
        let started = Instant::now();
        info!(
            "preparing {} environment for {} ({} step(s), driver {})",
            ctx.env_type,
            ctx.language,
            steps.len(),
            driver.name()
        );

        let bundle = match self.registry.get(&ctx.env_type, ctx, &self.config) {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("preparation aborted: {e}");
                return PreparationResult::aborted(e.to_string(), started.elapsed());
            }
        };

        let decision = bundle.store.check_rebuild_needed(ctx);
        debug!("rebuild decision: {}", decision.reason);

        let requirements = bundle.inspector.extract_requirements(steps);
        debug!("extracted {} requirement(s)", requirements.len());

        let observed = inspect_all(bundle.inspector.as_ref(), driver, &requirements);
        let statuses = bundle.planner.apply_rebuild_decision(&observed, &decision);
        let tasks = bundle.planner.generate_tasks(&statuses);

        let executable = bundle.planner.convert_to_executable(&tasks);
        let classifier = bundle.classifier.as_ref();
        let runner = RetryingRunner::new(&tasks, driver, classifier, &self.sleeper);
        let run = CompositeExecutor::with_runner(&runner).run(&executable);
        debug!(
            "executed {} of {} leaf operation(s), {} failed",
            run.results.len(),
            executable.count_leaves(),
            run.failed_count()
        );
        let outcomes = runner.into_outcomes(run.results.iter().map(|r| r.name.as_str()));

        let mut successful_tasks = Vec::new();
        let mut failed_tasks = Vec::new();
        let mut error_messages = Vec::new();
        for outcome in &outcomes {
            if outcome.success {
                successful_tasks.push(outcome.task_id.clone());
            } else {
                failed_tasks.push(outcome.task_id.clone());
                if let Some(e) = &outcome.error {
                    error_messages.push(format!("task {} failed: {e}", outcome.task_id));
                }
            }
        }

        let success = failed_tasks.is_empty();
        if success {
            bundle.store.update_state(ctx);
        }
        let elapsed = started.elapsed();
        info!(
            "preparation finished in {elapsed:.2?}: {} succeeded, {} failed",
            successful_tasks.len(),
            failed_tasks.len()
        );

        PreparationResult {
            success,
            tasks,
            successful_tasks,
            failed_tasks,
            error_messages,
            statuses,
            elapsed,
            decision: Some(decision),
            report: Some(classifier.report()),
            outcomes,
        }
    }
}

/// Leaf runner that looks up the task behind each leaf and retries it
/// according to the classifier.
struct RetryingRunner<'a> {
    tasks: HashMap<&'a str, &'a PreparationTask>,
    driver: &'a dyn Driver,
    classifier: &'a dyn FailureClassifier,
    sleeper: &'a Sleeper,
    outcomes: Mutex<HashMap<String, TaskOutcome>>,
}

impl<'a> RetryingRunner<'a> {
    fn new(
        tasks: &'a [PreparationTask],
        driver: &'a dyn Driver,
        classifier: &'a dyn FailureClassifier,
        sleeper: &'a Sleeper,
    ) -> Self {
        Self {
            tasks: tasks.iter().map(|t| (t.task_id.as_str(), t)).collect(),
            driver,
            classifier,
            sleeper,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Outcomes in the order the executor reported the leaves.
    fn into_outcomes<'n>(self, order: impl Iterator<Item = &'n str>) -> Vec<TaskOutcome> {
        let mut outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        order.filter_map(|name| outcomes.remove(name)).collect()
    }

    fn run_task(&self, task: &PreparationTask) -> (TaskOutcome, OperationOutput) {
        let mut attempt: u32 = 1;
        loop {
            debug!("{} attempt {attempt}: {}", task.task_id, task.description);
            let output = match self.driver.execute(&task.operation) {
                Ok(output) => output,
                Err(e) => OperationOutput::failed(e.to_string()),
            };
            if output.success {
                info!("{} done: {}", task.task_id, task.description);
                return (outcome(task, attempt, None), output);
            }

            let failure = output.error_text();
            let mut context = BTreeMap::new();
            context.insert("task_id".to_owned(), task.task_id.to_string());
            context.insert("task_type".to_owned(), task.task_type.to_string());
            context.insert("attempt".to_owned(), attempt.to_string());
            let classified = self.classifier.classify(&failure, &context);

            if self.classifier.should_retry(&classified, attempt) {
                let delay = self.classifier.retry_delay(attempt, task.task_id.as_str());
                warn!(
                    "{} failed ({}, attempt {attempt}/{}); retrying in {delay:?}",
                    task.task_id,
                    classified.category,
                    self.classifier.max_attempts()
                );
                (self.sleeper)(delay);
                attempt += 1;
                continue;
            }

            error!(
                "{} failed after {attempt} attempt(s): {} ({})",
                task.task_id, classified.message, classified.suggested_action
            );
            return (outcome(task, attempt, Some(failure)), output);
        }
    }
}

impl LeafRunner for RetryingRunner<'_> {
    fn run_leaf(&self, leaf: &LeafOperation) -> Result<OperationOutput, RuntimeError> {
        let Some(task) = self.tasks.get(leaf.name.as_str()) else {
            return self.driver.execute(&leaf.operation);
        };
        let (outcome, output) = self.run_task(task);
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(leaf.name.clone(), outcome);
        Ok(output)
    }
}

fn outcome(task: &PreparationTask, attempts: u32, error: Option<String>) -> TaskOutcome {
    TaskOutcome {
        task_id: task.task_id.clone(),
        task_type: task.task_type,
        description: task.description.clone(),
        success: error.is_none(),
        attempts,
        error,
    }
}

fn of_type(requirements: &[ResourceRequirement], ty: ResourceType) -> Vec<ResourceRequirement> {
    requirements
        .iter()
        .filter(|r| r.resource_type == ty)
        .cloned()
        .collect()
}

/// Inspect every category on its own thread. A category that errors or
/// panics contributes nothing.
fn inspect_all(
    inspector: &dyn ResourceInspector,
    driver: &dyn Driver,
    requirements: &[ResourceRequirement],
) -> StatusMap {
    let containers = of_type(requirements, ResourceType::Container);
    let networks = of_type(requirements, ResourceType::Network);
    let directories: Vec<PathBuf> = of_type(requirements, ResourceType::Directory)
        .into_iter()
        .map(|r| PathBuf::from(r.identifier))
        .collect();
    let images: Vec<String> = of_type(requirements, ResourceType::Image)
        .into_iter()
        .map(|r| r.identifier)
        .collect();

    thread::scope(|scope| {
        let handles = [
            (
                ResourceType::Container,
                scope.spawn(|| inspector.inspect_containers(driver, &containers)),
            ),
            (
                ResourceType::Directory,
                scope.spawn(|| inspector.inspect_directories(driver, &directories)),
            ),
            (
                ResourceType::Image,
                scope.spawn(|| inspector.inspect_images(driver, &images)),
            ),
            (
                ResourceType::Network,
                scope.spawn(|| inspector.inspect_networks(driver, &networks)),
            ),
        ];

        let mut merged = StatusMap::new();
        for (category, handle) in handles {
            match handle.join() {
                Ok(Ok(map)) => merged.extend(map),
                Ok(Err(e)) => warn!("{category} inspection failed, continuing without it: {e}"),
                Err(_) => warn!("{category} inspection panicked, continuing without it"),
            }
        }
        merged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_runtime::MockDriver;
    use moorage_schema::NamingConfig;
    use moorage_store::{FingerprintStore, StateStore};
    use std::sync::{Arc, Mutex};

    fn orchestrator(store: Arc<dyn StateStore>) -> Orchestrator {
        Orchestrator::new(ProviderRegistry::with_docker(store), EngineConfig::default())
            .with_sleeper(|_| {})
    }

    fn store() -> Arc<dyn StateStore> {
        Arc::new(FingerprintStore::in_memory(NamingConfig::default()))
    }

    #[test]
    fn unknown_env_type_aborts_with_one_message() {
        let result = orchestrator(store()).prepare(
            &EnvContext::new("go", "podman"),
            &[Step::new("mkdir", "/x")],
            &MockDriver::new(),
        );
        assert!(!result.success);
        assert_eq!(result.error_messages.len(), 1);
        assert!(result.tasks.is_empty());
        assert!(result.decision.is_none());
    }

    #[test]
    fn failed_task_does_not_stop_the_rest() {
        let driver = MockDriver::new();
        driver.fail_target_times("/a", 1, "mkdir /a: permission denied");
        let store = store();
        let result = orchestrator(Arc::clone(&store)).prepare(
            &EnvContext::new("go", "docker"),
            &[Step::new("mkdir", "/a"), Step::new("mkdir", "/b")],
            &driver,
        );
        assert!(!result.success);
        assert_eq!(result.failed_tasks, [TaskId::new("mkdir_001")]);
        assert_eq!(result.successful_tasks, [TaskId::new("mkdir_002")]);
        assert!(result.error_messages[0].contains("permission denied"));
        assert_eq!(result.outcomes[0].attempts, 1);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn retries_are_slept_through_the_sleeper() {
        let driver = MockDriver::new();
        driver.fail_target_times("/a", 2, "dial tcp: i/o timeout");
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let result = Orchestrator::new(ProviderRegistry::with_docker(store()), EngineConfig::default())
            .with_sleeper(move |d| recorded.lock().unwrap().push(d))
            .prepare(&EnvContext::new("go", "docker"), &[Step::new("mkdir", "/a")], &driver);

        assert!(result.success);
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(
            *delays.lock().unwrap(),
            [Duration::from_secs(1), Duration::from_secs(2)]
        );
        let report = result.report.unwrap();
        assert_eq!(report.by_category.get("network"), Some(&2));
    }

    #[test]
    fn prepare_if_needed_skips_unchanged_environment() {
        let store = store();
        let o = orchestrator(Arc::clone(&store));
        let ctx = EnvContext::new("go", "docker");
        let driver = MockDriver::new();
        assert!(o.prepare_if_needed(&ctx, &[], &driver).is_some());
        assert!(o.prepare_if_needed(&ctx, &[], &driver).is_none());
        assert!(store.get("go_docker").is_some());
    }
}
