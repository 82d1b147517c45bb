use crate::driver::{ContainerState, ContainerSummary, Driver};
use crate::operation::{Operation, OperationOutput};
use crate::RuntimeError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct MockContainer {
    image: String,
    running: bool,
}

#[derive(Debug)]
enum FailureMatch {
    Kind(String),
    Target(String),
}

#[derive(Debug)]
struct ScriptedFailure {
    matches: FailureMatch,
    remaining: usize,
    stderr: String,
}

impl ScriptedFailure {
    fn applies_to(&self, operation: &Operation) -> bool {
        self.remaining > 0
            && match &self.matches {
                FailureMatch::Kind(kind) => kind == operation.kind(),
                FailureMatch::Target(target) => *target == operation.target(),
            }
    }
}

#[derive(Debug, Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    images: BTreeSet<String>,
    networks: BTreeSet<String>,
    dirs: BTreeSet<PathBuf>,
    executed: Vec<Operation>,
    failures: VecDeque<ScriptedFailure>,
    latencies: BTreeMap<String, Duration>,
    broken_queries: BTreeSet<&'static str>,
}

/// In-memory driver. Simulates docker semantics closely enough for the
/// engine (name conflicts, missing images, stopped containers) and lets
/// tests script failures and latencies.
pub struct MockDriver {
    state: Mutex<MockState>,
    networks_supported: bool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            networks_supported: true,
        }
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose `network_exists` reports `Unsupported`.
    pub fn without_network_support() -> Self {
        Self {
            networks_supported: false,
            ..Self::default()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    fn with_state(&self, f: impl FnOnce(&mut MockState)) {
        if let Ok(mut state) = self.lock() {
            f(&mut state);
        }
    }

    pub fn add_image(&self, image: &str) {
        self.with_state(|s| {
            s.images.insert(image.to_owned());
        });
    }

    pub fn add_container(&self, name: &str, image: &str, running: bool) {
        self.with_state(|s| {
            s.containers.insert(
                name.to_owned(),
                MockContainer {
                    image: image.to_owned(),
                    running,
                },
            );
        });
    }

    pub fn add_network(&self, name: &str) {
        self.with_state(|s| {
            s.networks.insert(name.to_owned());
        });
    }

    pub fn add_directory(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.with_state(|s| {
            s.dirs.insert(path);
        });
    }

    /// Fail the next `times` operations of `kind` (see [`Operation::kind`]) with `stderr`.
    pub fn fail_times(&self, kind: &str, times: usize, stderr: &str) {
        self.script(FailureMatch::Kind(kind.to_owned()), times, stderr);
    }

    /// Fail the next `times` operations whose target (see [`Operation::target`]) is `target`.
    pub fn fail_target_times(&self, target: &str, times: usize, stderr: &str) {
        self.script(FailureMatch::Target(target.to_owned()), times, stderr);
    }

    fn script(&self, matches: FailureMatch, times: usize, stderr: &str) {
        self.with_state(|s| {
            s.failures.push_back(ScriptedFailure {
                matches,
                remaining: times,
                stderr: stderr.to_owned(),
            });
        });
    }

    /// Sleep for `latency` whenever an operation whose target is `target` runs.
    pub fn set_latency(&self, target: &str, latency: Duration) {
        self.with_state(|s| {
            s.latencies.insert(target.to_owned(), latency);
        });
    }

    /// Make a query (`"containers"`, `"images"`, `"networks"`) return an error.
    pub fn break_query(&self, query: &'static str) {
        self.with_state(|s| {
            s.broken_queries.insert(query);
        });
    }

    pub fn executed(&self) -> Vec<Operation> {
        self.lock().map(|s| s.executed.clone()).unwrap_or_default()
    }

    pub fn executed_kinds(&self) -> Vec<&'static str> {
        self.executed().iter().map(Operation::kind).collect()
    }

    pub fn container_running(&self, name: &str) -> bool {
        self.lock()
            .ok()
            .and_then(|s| s.containers.get(name).map(|c| c.running))
            .unwrap_or(false)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().is_ok_and(|s| s.images.contains(image))
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.lock().is_ok_and(|s| s.networks.contains(name))
    }

    fn check_query(&self, query: &'static str) -> Result<(), RuntimeError> {
        if self.lock()?.broken_queries.contains(query) {
            return Err(RuntimeError::ExecFailed(format!(
                "mock {query} query failed"
            )));
        }
        Ok(())
    }
}

fn take_scripted_failure(state: &mut MockState, operation: &Operation) -> Option<String> {
    let pos = state.failures.iter().position(|f| f.applies_to(operation))?;
    let failure = &mut state.failures[pos];
    failure.remaining -= 1;
    let stderr = failure.stderr.clone();
    if failure.remaining == 0 {
        state.failures.remove(pos);
    }
    Some(stderr)
}

fn apply(state: &mut MockState, operation: &Operation) -> OperationOutput {
    match operation {
        Operation::Shell { command } => OperationOutput::ok(format!("mock-shell: {command}\n")),
        Operation::Mkdir { path } => {
            state.dirs.insert(path.clone());
            OperationOutput::ok(String::new())
        }
        Operation::RemoveContainer { name, force } => match state.containers.get(name) {
            None => OperationOutput::failed(format!(
                "Error response from daemon: No such container: {name}"
            )),
            Some(c) if c.running && !force => OperationOutput::failed(format!(
                "Error response from daemon: You cannot remove a running container {name}. \
                 Stop the container before attempting removal or force remove; container is running"
            )),
            Some(_) => {
                state.containers.remove(name);
                OperationOutput::ok(format!("{name}\n"))
            }
        },
        Operation::RunContainer(spec) => {
            if state.containers.contains_key(&spec.name) {
                return OperationOutput::failed(format!(
                    "docker: Error response from daemon: Conflict. The container name \"/{}\" \
                     is already in use",
                    spec.name
                ));
            }
            if !state.images.contains(&spec.image) {
                return OperationOutput::failed(format!(
                    "Unable to find image '{}' locally: pull access denied, repository does not exist",
                    spec.image
                ));
            }
            state.containers.insert(
                spec.name.clone(),
                MockContainer {
                    image: spec.image.clone(),
                    running: true,
                },
            );
            OperationOutput::ok(format!("{}\n", spec.name))
        }
        Operation::BuildImage { image, .. } | Operation::PullImage { image } => {
            state.images.insert(image.clone());
            OperationOutput::ok(format!("{image}\n"))
        }
        Operation::CreateNetwork { name } => {
            if state.networks.insert(name.clone()) {
                OperationOutput::ok(format!("{name}\n"))
            } else {
                OperationOutput::failed(format!(
                    "Error response from daemon: network with name {name} already exists"
                ))
            }
        }
        Operation::Exec { container, command } => match state.containers.get(container) {
            Some(c) if c.running => OperationOutput::ok(format!("mock-exec: {command}\n")),
            Some(_) => OperationOutput::failed(format!(
                "Error response from daemon: container {container} is not running"
            )),
            None => OperationOutput::failed(format!(
                "Error response from daemon: No such container: {container}"
            )),
        },
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn execute(&self, operation: &Operation) -> Result<OperationOutput, RuntimeError> {
        let latency = self.lock()?.latencies.get(&operation.target()).copied();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }

        let mut state = self.lock()?;
        state.executed.push(operation.clone());
        if let Some(stderr) = take_scripted_failure(&mut state, operation) {
            return Ok(OperationOutput::failed(stderr));
        }
        Ok(apply(&mut state, operation))
    }

    fn inspect_container(&self, name: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        self.check_query("containers")?;
        let state = self.lock()?;
        Ok(state.containers.get(name).map(|c| {
            let status = if c.running { "running" } else { "exited" };
            serde_json::json!({
                "Name": format!("/{name}"),
                "Config": { "Image": c.image },
                "State": { "Running": c.running, "Status": status },
            })
        }))
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.check_query("containers")?;
        let state = self.lock()?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(name, c)| ContainerSummary {
                name: name.clone(),
                state: if c.running {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                },
            })
            .collect())
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.check_query("images")?;
        Ok(self.lock()?.images.contains(image))
    }

    fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        if !self.networks_supported {
            return Err(RuntimeError::Unsupported {
                driver: self.name().to_owned(),
                operation: "network inspection".to_owned(),
            });
        }
        self.check_query("networks")?;
        Ok(self.lock()?.networks.contains(name))
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.lock().is_ok_and(|s| s.dirs.contains(path))
    }
}
