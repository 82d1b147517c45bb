use crate::driver::{ContainerState, ContainerSummary, Driver};
use crate::operation::{Operation, OperationOutput, RunSpec};
use crate::RuntimeError;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

/// Driver backed by the `docker` command-line client.
pub struct DockerDriver {
    binary: String,
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self {
            binary: "docker".to_owned(),
        }
    }
}

impl DockerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String], stdin: Option<&str>) -> Result<OperationOutput, RuntimeError> {
        debug!("{} {}", self.binary, args.join(" "));
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        let output = match stdin {
            None => cmd.output().map_err(|e| {
                RuntimeError::ExecFailed(format!("failed to run {}: {e}", self.binary))
            })?,
            Some(input) => {
                let mut child = cmd
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        RuntimeError::ExecFailed(format!("failed to run {}: {e}", self.binary))
                    })?;
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input.as_bytes())?;
                }
                child.wait_with_output()?
            }
        };
        Ok(OperationOutput::from_process(&output))
    }

    fn query(&self, args: &[&str]) -> Result<OperationOutput, RuntimeError> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        self.run(&args, None)
    }
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_owned(),
        "-d".to_owned(),
        "--name".to_owned(),
        spec.name.clone(),
    ];
    for (host, container) in &spec.mounts {
        args.push("-v".to_owned());
        args.push(format!("{host}:{container}"));
    }
    if let Some(dir) = &spec.working_dir {
        args.push("-w".to_owned());
        args.push(dir.clone());
    }
    if let Some(mem) = &spec.memory_limit {
        args.push("--memory".to_owned());
        args.push(mem.clone());
    }
    if let Some(cpus) = &spec.cpu_limit {
        args.push("--cpus".to_owned());
        args.push(cpus.clone());
    }
    if let Some(net) = &spec.network {
        args.push("--network".to_owned());
        args.push(net.clone());
    }
    args.push(spec.image.clone());
    args.extend(["sh".to_owned(), "-c".to_owned(), spec.command.clone()]);
    args
}

/// Docker CLI arguments for an operation, or `None` for operations that
/// are not docker commands.
pub fn docker_args(operation: &Operation) -> Option<Vec<String>> {
    let owned = |parts: &[&str]| parts.iter().map(|p| (*p).to_owned()).collect::<Vec<_>>();
    match operation {
        Operation::Shell { .. } | Operation::Mkdir { .. } => None,
        Operation::RemoveContainer { name, force } => {
            let mut args = owned(&["rm"]);
            if *force {
                args.push("-f".to_owned());
            }
            args.push(name.clone());
            Some(args)
        }
        Operation::RunContainer(spec) => Some(run_args(spec)),
        Operation::BuildImage { image, context, .. } => {
            let ctx = context
                .as_ref()
                .map_or_else(|| ".".to_owned(), |p| p.display().to_string());
            Some(owned(&["build", "-t", image.as_str(), "-f", "-", ctx.as_str()]))
        }
        Operation::PullImage { image } => Some(owned(&["pull", image.as_str()])),
        Operation::CreateNetwork { name } => Some(owned(&["network", "create", name.as_str()])),
        Operation::Exec { container, command } => {
            Some(owned(&["exec", container.as_str(), "sh", "-c", command.as_str()]))
        }
    }
}

fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let (name, state) = line.split_once('\t')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let state = if state.trim().eq_ignore_ascii_case("running") {
        ContainerState::Running
    } else {
        ContainerState::Stopped
    };
    Some(ContainerSummary {
        name: name.to_owned(),
        state,
    })
}

fn is_missing(output: &OperationOutput) -> bool {
    let msg = output.stderr.to_lowercase();
    msg.contains("no such") || msg.contains("not found")
}

impl Driver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        Command::new(&self.binary)
            .args(["info", "--format", "{{.ServerVersion}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn execute(&self, operation: &Operation) -> Result<OperationOutput, RuntimeError> {
        match operation {
            Operation::Shell { command } => {
                let output = Command::new("sh").args(["-c", command.as_str()]).output()?;
                Ok(OperationOutput::from_process(&output))
            }
            Operation::Mkdir { path } => match std::fs::create_dir_all(path) {
                Ok(()) => Ok(OperationOutput::ok(format!("created {}", path.display()))),
                Err(e) => Ok(OperationOutput::failed(format!(
                    "mkdir {}: {e}",
                    path.display()
                ))),
            },
            Operation::BuildImage { definition, .. } => {
                let args = docker_args(operation).unwrap_or_default();
                self.run(&args, Some(definition))
            }
            other => {
                let args = docker_args(other).unwrap_or_default();
                self.run(&args, None)
            }
        }
    }

    fn inspect_container(&self, name: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        let output = self.query(&["inspect", "--type", "container", name])?;
        if !output.success {
            if is_missing(&output) {
                return Ok(None);
            }
            return Err(RuntimeError::ExecFailed(output.error_text()));
        }
        let docs: Vec<serde_json::Value> = serde_json::from_str(&output.stdout)
            .map_err(|e| RuntimeError::MalformedOutput(format!("docker inspect: {e}")))?;
        Ok(docs.into_iter().next())
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut args = vec!["ps", "--format", "{{.Names}}\t{{.State}}"];
        if all {
            args.push("-a");
        }
        let output = self.query(&args)?;
        if !output.success {
            return Err(RuntimeError::ExecFailed(output.error_text()));
        }
        Ok(output.stdout.lines().filter_map(parse_ps_line).collect())
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = self.query(&["image", "inspect", image])?;
        if output.success {
            return Ok(true);
        }
        if is_missing(&output) {
            return Ok(false);
        }
        Err(RuntimeError::ExecFailed(output.error_text()))
    }

    fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let output = self.query(&["network", "inspect", name])?;
        if output.success {
            return Ok(true);
        }
        if is_missing(&output) {
            return Ok(false);
        }
        Err(RuntimeError::ExecFailed(output.error_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn run_container_args_include_limits_and_mounts() {
        let op = Operation::RunContainer(RunSpec {
            image: "moorage-python".to_owned(),
            name: "moorage-python-container".to_owned(),
            command: "tail -f /dev/null".to_owned(),
            mounts: vec![("/home/u/proj".to_owned(), "/workspace".to_owned())],
            working_dir: Some("/workspace".to_owned()),
            memory_limit: Some("2g".to_owned()),
            cpu_limit: Some("1".to_owned()),
            network: None,
        });
        let args = docker_args(&op).unwrap();
        assert_eq!(&args[..4], ["run", "-d", "--name", "moorage-python-container"]);
        let joined = args.join(" ");
        assert!(joined.contains("-v /home/u/proj:/workspace"));
        assert!(joined.contains("-w /workspace"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains("--cpus 1"));
        assert!(joined.ends_with("moorage-python sh -c tail -f /dev/null"));
    }

    #[test]
    fn remove_args_honour_force() {
        let forced = Operation::RemoveContainer {
            name: "c".to_owned(),
            force: true,
        };
        assert_eq!(docker_args(&forced).unwrap(), ["rm", "-f", "c"]);
        let polite = Operation::RemoveContainer {
            name: "c".to_owned(),
            force: false,
        };
        assert_eq!(docker_args(&polite).unwrap(), ["rm", "c"]);
    }

    #[test]
    fn build_reads_definition_from_stdin() {
        let op = Operation::BuildImage {
            image: "img".to_owned(),
            definition: "FROM alpine".to_owned(),
            context: Some(PathBuf::from("/src")),
        };
        assert_eq!(
            docker_args(&op).unwrap(),
            ["build", "-t", "img", "-f", "-", "/src"]
        );
    }

    #[test]
    fn local_operations_have_no_docker_args() {
        assert!(docker_args(&Operation::mkdir("/tmp/x")).is_none());
        assert!(docker_args(&Operation::shell("ls")).is_none());
    }

    #[test]
    fn parses_ps_output() {
        assert_eq!(
            parse_ps_line("web\trunning"),
            Some(ContainerSummary {
                name: "web".to_owned(),
                state: ContainerState::Running
            })
        );
        assert_eq!(
            parse_ps_line("old\texited").map(|c| c.state),
            Some(ContainerState::Stopped)
        );
        assert!(parse_ps_line("garbage").is_none());
    }

    #[test]
    fn mkdir_runs_locally() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        let out = DockerDriver::new()
            .execute(&Operation::mkdir(&target))
            .unwrap();
        assert!(out.success);
        assert!(target.is_dir());
    }

    #[test]
    fn missing_binary_is_exec_error() {
        let driver = DockerDriver::with_binary("/nonexistent/docker-binary");
        assert!(!driver.available());
        assert!(matches!(
            driver.execute(&Operation::PullImage {
                image: "alpine".to_owned()
            }),
            Err(RuntimeError::ExecFailed(_))
        ));
    }
}
