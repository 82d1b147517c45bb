//! End-to-end preparation runs against the in-memory driver.

use moorage_core::{
    dependency_batches, sort_tasks, DockerInspector, DockerPlanner, ErrorClassifier,
    Orchestrator, PreparationResult, ProviderBundle, ProviderRegistry, ResourceInspector,
    TaskPlanner,
};
use moorage_runtime::{Driver, MockDriver};
use moorage_schema::{
    parse_config_str, CurrentState, EngineConfig, EnvContext, NamingConfig, PrepAction,
    ResourceStatus, ResourceType, StatusMap, Step,
};
use moorage_store::{FingerprintStore, StateStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn memory_store() -> Arc<dyn StateStore> {
    Arc::new(FingerprintStore::in_memory(NamingConfig::default()))
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<dyn StateStore>,
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let store = memory_store();
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let orchestrator = Orchestrator::new(ProviderRegistry::with_docker(Arc::clone(&store)), config)
            .with_sleeper(move |d| recorded.lock().unwrap().push(d));
        Self {
            orchestrator,
            store,
            delays,
        }
    }

    fn prepare(&self, ctx: &EnvContext, steps: &[Step], driver: &dyn Driver) -> PreparationResult {
        self.orchestrator.prepare(ctx, steps, driver)
    }

    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

fn python() -> EnvContext {
    EnvContext::new("python", "docker").with_definition("FROM python:3.12-slim\n")
}

fn python_steps() -> Vec<Step> {
    vec![
        Step::new("mkdir", "/work/out"),
        Step::new("docker_exec", "moorage-python-container"),
        Step::new("network", "judge-net"),
    ]
}

fn task_ids(result: &PreparationResult) -> Vec<&str> {
    result.tasks.iter().map(|t| t.task_id.as_str()).collect()
}

#[test]
fn fresh_environment_is_fully_prepared() {
    let h = Harness::new();
    let driver = MockDriver::new();
    let result = h.prepare(&python(), &python_steps(), &driver);

    assert!(result.success, "{:?}", result.error_messages);
    assert_eq!(
        task_ids(&result),
        ["mkdir_001", "docker_build_002", "network_create_003", "docker_run_004"]
    );
    assert_eq!(result.successful_tasks.len(), 4);
    assert!(result.failed_tasks.is_empty());
    assert!(driver.container_running("moorage-python-container"));
    assert!(driver.has_image("moorage-python"));
    assert!(driver.has_network("judge-net"));

    let kinds = driver.executed_kinds();
    let build = kinds.iter().position(|k| *k == "build_image").unwrap();
    let run = kinds.iter().position(|k| *k == "run_container").unwrap();
    assert!(build < run);

    assert_eq!(result.report.as_ref().unwrap().status, "no_errors");
    assert!(h.store.get("python_docker").is_some());
}

#[test]
fn unchanged_environment_needs_no_work() {
    let h = Harness::new();
    let driver = MockDriver::new();
    let ctx = python();
    assert!(h.prepare(&ctx, &python_steps(), &driver).success);
    let executed_before = driver.executed().len();

    assert!(h
        .orchestrator
        .prepare_if_needed(&ctx, &python_steps(), &driver)
        .is_none());

    let again = h.prepare(&ctx, &python_steps(), &driver);
    assert!(again.success);
    assert!(again.tasks.is_empty());
    assert_eq!(driver.executed().len(), executed_before);
}

#[test]
fn definition_change_rebuilds_and_recreates() {
    let h = Harness::new();
    let driver = MockDriver::new();
    assert!(h.prepare(&python(), &python_steps(), &driver).success);
    let executed_before = driver.executed().len();

    let edited = EnvContext::new("python", "docker").with_definition("FROM python:3.13-slim\n");
    let decision = h.orchestrator.rebuild_decision(&edited).unwrap();
    assert!(decision.image_rebuild_needed);
    assert!(decision.container_recreate_needed);

    let result = h.prepare(&edited, &python_steps(), &driver);
    assert!(result.success, "{:?}", result.error_messages);
    let kinds: Vec<&str> = driver.executed_kinds()[executed_before..].to_vec();
    assert_eq!(kinds, ["build_image", "remove_container", "run_container"]);
    assert!(!h
        .orchestrator
        .rebuild_decision(&edited)
        .unwrap()
        .any_action_needed());
}

#[test]
fn empty_steps_succeed_with_no_tasks() {
    let h = Harness::new();
    let result = h.prepare(&python(), &[], &MockDriver::new());
    assert!(result.success);
    assert!(result.tasks.is_empty());
    assert!(result.error_messages.is_empty());
    assert_eq!(result.report.unwrap().total_errors, 0);
}

#[test]
fn retryable_failure_succeeds_on_last_attempt() {
    let h = Harness::new();
    let driver = MockDriver::new();
    driver.fail_times("run_container", 2, "dial tcp 10.0.0.1:443: network timeout");

    let ctx = EnvContext::new("go", "docker");
    let result = h.prepare(&ctx, &[Step::new("docker_exec", "moorage-go-container")], &driver);

    assert!(result.success, "{:?}", result.error_messages);
    let run = result
        .outcomes
        .iter()
        .find(|o| o.task_id.starts_with("docker_run"))
        .unwrap();
    assert_eq!(run.attempts, 3);
    assert!(result.successful_tasks.contains(&run.task_id));

    let delays = h.delays();
    assert_eq!(delays.len(), 2);
    assert!(delays[0] <= delays[1]);
}

#[test]
fn exhausted_retries_fail_the_task_but_not_the_run() {
    let h = Harness::new();
    let driver = MockDriver::new();
    driver.fail_times("pull_image", 3, "net/http: TLS handshake timeout");

    let ctx = EnvContext::new("go", "docker");
    let result = h.prepare(
        &ctx,
        &[
            Step::new("docker_exec", "moorage-go-container"),
            Step::new("mkdir", "/srv/go"),
        ],
        &driver,
    );

    assert!(!result.success);
    let pull = result
        .outcomes
        .iter()
        .find(|o| o.task_id.starts_with("image_pull"))
        .unwrap();
    assert!(!pull.success);
    assert_eq!(pull.attempts, 3);
    assert_eq!(h.delays().len(), 2);

    // The run fails on the missing image without retries; the mkdir still runs.
    let run = result
        .outcomes
        .iter()
        .find(|o| o.task_id.starts_with("docker_run"))
        .unwrap();
    assert!(!run.success);
    assert_eq!(run.attempts, 1);
    assert!(result
        .successful_tasks
        .iter()
        .any(|id| id.starts_with("mkdir")));

    let report = result.report.unwrap();
    assert_eq!(report.status, "errors_found");
    assert!(report.by_category.contains_key("image"));
    assert!(h.store.get("go_docker").is_none());
}

#[test]
fn critical_errors_are_never_retried() {
    let h = Harness::new();
    let driver = MockDriver::new();
    driver.fail_times(
        "mkdir",
        5,
        "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
    );
    let result = h.prepare(&python(), &[Step::new("mkdir", "/tmp/x")], &driver);

    assert!(!result.success);
    assert_eq!(result.outcomes[0].attempts, 1);
    assert!(h.delays().is_empty());
    assert_eq!(
        result.report.unwrap().by_severity.get("critical"),
        Some(&1)
    );
}

#[test]
fn unsupported_network_inspection_degrades_to_no_network_tasks() {
    let h = Harness::new();
    let driver = MockDriver::without_network_support();
    let result = h.prepare(
        &python(),
        &[Step::new("network", "judge-net"), Step::new("mkdir", "/tmp/x")],
        &driver,
    );
    assert!(result.success);
    assert!(!result.statuses.contains_key("network:judge-net"));
    assert_eq!(task_ids(&result), ["mkdir_001"]);
}

#[test]
fn broken_container_query_keeps_other_categories() {
    let h = Harness::new();
    let driver = MockDriver::new();
    driver.break_query("containers");
    let ctx = EnvContext::new("go", "docker");
    let result = h.prepare(&ctx, &[Step::new("docker_exec", "moorage-go-container")], &driver);

    assert!(result.success);
    assert!(result.statuses.contains_key("image:moorage-go"));
    assert!(!result.statuses.contains_key("container:moorage-go-container"));
    assert_eq!(task_ids(&result), ["image_pull_001"]);
}

#[test]
fn sequential_mode_runs_in_sorted_order() {
    let config = parse_config_str("[execution]\nparallel_groups = false\n").unwrap();
    let h = Harness::with_config(config);
    let driver = MockDriver::new();
    let result = h.prepare(&python(), &python_steps(), &driver);

    assert!(result.success);
    let executed: Vec<String> = driver.executed().iter().map(|op| op.kind().to_owned()).collect();
    assert_eq!(
        executed,
        ["mkdir", "build_image", "create_network", "run_container"]
    );
}

#[test]
fn retry_sleep_does_not_hold_back_grouped_siblings() {
    let pause = Duration::from_millis(200);
    let orchestrator = Orchestrator::new(
        ProviderRegistry::with_docker(memory_store()),
        EngineConfig::default(),
    )
    .with_sleeper(move |_| std::thread::sleep(pause));
    let driver = MockDriver::new();
    driver.fail_target_times("/work/a", 1, "dial tcp: i/o timeout");

    let result = orchestrator.prepare(
        &EnvContext::new("go", "docker"),
        &[Step::new("mkdir", "/work/a"), Step::new("mkdir", "/work/b")],
        &driver,
    );

    assert!(result.success, "{:?}", result.error_messages);
    let attempts: Vec<u32> = result.outcomes.iter().map(|o| o.attempts).collect();
    assert_eq!(attempts, [2, 1]);

    // The sibling ran while the first task was sleeping before its retry.
    let targets: Vec<String> = driver.executed().iter().map(|op| op.target()).collect();
    let sibling = targets.iter().position(|t| t == "/work/b").unwrap();
    let retry = targets.iter().rposition(|t| t == "/work/a").unwrap();
    assert_eq!(targets.len(), 3);
    assert!(sibling < retry, "executed: {targets:?}");
}

#[test]
fn sequential_mode_retries_before_moving_on() {
    let config = parse_config_str("[execution]\nparallel_groups = false\n").unwrap();
    let h = Harness::with_config(config);
    let driver = MockDriver::new();
    driver.fail_target_times("/work/a", 1, "dial tcp: i/o timeout");

    let result = h.prepare(
        &EnvContext::new("go", "docker"),
        &[Step::new("mkdir", "/work/a"), Step::new("mkdir", "/work/b")],
        &driver,
    );

    assert!(result.success);
    let targets: Vec<String> = driver.executed().iter().map(|op| op.target()).collect();
    assert_eq!(targets, ["/work/a", "/work/a", "/work/b"]);
    assert_eq!(h.delays().len(), 1);
}

#[test]
fn generated_tasks_sort_after_their_dependencies() {
    let ctx = python().with_oj_definition("FROM python:3.12\nRUN pip install pytest\n");
    let config = EngineConfig::default();
    let inspector = DockerInspector::new(&ctx, &config);
    let planner = DockerPlanner::new(&ctx, &config);

    let requirements = inspector.extract_requirements(&[
        Step::new("docker_exec", "moorage-python-container"),
        Step::new("docker_exec", "moorage-python-oj-container"),
        Step::new("docker_cp", "").with_destination("moorage-python-container:/work/src/a.py"),
        Step::new("mkdir", "/tmp/build"),
        Step::new("network", "net"),
    ]);
    let statuses: StatusMap = requirements
        .iter()
        .map(|r| {
            let action = match r.resource_type {
                ResourceType::Container => PrepAction::RunNewContainer,
                ResourceType::Image => PrepAction::BuildOrPullImage,
                ResourceType::Directory => PrepAction::CreateDirectory,
                ResourceType::Network => PrepAction::CreateNetwork,
            };
            let status = ResourceStatus::unsatisfied(
                r.resource_type,
                r.identifier.clone(),
                CurrentState::Missing,
                false,
                vec![action],
            );
            (status.key(), status)
        })
        .collect();

    let tasks = planner.generate_tasks(&statuses);
    assert_eq!(tasks.len(), statuses.len());

    let sorted = sort_tasks(&tasks);
    let mut seen = HashSet::new();
    for task in &sorted {
        for dep in &task.dependencies {
            assert!(seen.contains(dep), "{} ran before {dep}", task.task_id);
        }
        seen.insert(task.task_id.clone());
    }

    // Both builds share one parallel batch.
    let batches = dependency_batches(&tasks);
    let builds = batches
        .iter()
        .find(|b| b.tasks.iter().any(|t| t.task_id.starts_with("docker_build")))
        .unwrap();
    assert!(builds.is_parallel());
    assert_eq!(builds.tasks.len(), 2);
}

#[test]
fn check_is_idempotent_and_update_clears_flags() {
    let h = Harness::new();
    let ctx = python();
    let first = h.orchestrator.rebuild_decision(&ctx).unwrap();
    let second = h.orchestrator.rebuild_decision(&ctx).unwrap();
    assert_eq!(first, second);
    assert!(first.any_action_needed());

    h.store.update_state(&ctx);
    let after = h.orchestrator.rebuild_decision(&ctx).unwrap();
    assert!(!after.image_rebuild_needed);
    assert!(!after.container_recreate_needed);
    assert!(!after.oj_image_rebuild_needed);
    assert!(!after.oj_container_recreate_needed);
}

#[test]
fn custom_providers_plug_in_by_env_type() {
    let store = memory_store();
    let mut registry = ProviderRegistry::with_docker(Arc::clone(&store));
    let shared = Arc::clone(&store);
    registry.register(
        "local",
        Box::new(move |ctx, config| {
            Ok(ProviderBundle {
                inspector: Box::new(DockerInspector::new(ctx, config)),
                planner: Box::new(DockerPlanner::new(ctx, config)),
                store: Arc::clone(&shared),
                classifier: Box::new(ErrorClassifier::from_config(config)),
            })
        }),
    );
    assert_eq!(registry.env_types(), ["docker", "local"]);

    let orchestrator = Orchestrator::new(registry, EngineConfig::default());
    let ctx = EnvContext::new("rust", "local");
    let result = orchestrator.prepare(&ctx, &[Step::new("mkdir", "/opt/rust")], &MockDriver::new());
    assert!(result.success);
    assert!(store.get("rust_local").is_some());
}
