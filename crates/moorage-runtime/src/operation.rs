use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Everything needed to start a long-running environment container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub command: String,
    /// `(host_path, container_path)` bind mounts.
    #[serde(default)]
    pub mounts: Vec<(String, String)>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// An atomic unit of work a driver can execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Shell {
        command: String,
    },
    Mkdir {
        path: PathBuf,
    },
    RemoveContainer {
        name: String,
        force: bool,
    },
    RunContainer(RunSpec),
    BuildImage {
        image: String,
        definition: String,
        #[serde(default)]
        context: Option<PathBuf>,
    },
    PullImage {
        image: String,
    },
    CreateNetwork {
        name: String,
    },
    Exec {
        container: String,
        command: String,
    },
}

impl Operation {
    pub fn shell(command: impl Into<String>) -> Self {
        Operation::Shell {
            command: command.into(),
        }
    }

    pub fn mkdir(path: impl Into<PathBuf>) -> Self {
        Operation::Mkdir { path: path.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Shell { .. } => "shell",
            Operation::Mkdir { .. } => "mkdir",
            Operation::RemoveContainer { .. } => "remove_container",
            Operation::RunContainer(_) => "run_container",
            Operation::BuildImage { .. } => "build_image",
            Operation::PullImage { .. } => "pull_image",
            Operation::CreateNetwork { .. } => "create_network",
            Operation::Exec { .. } => "exec",
        }
    }

    /// The resource the operation acts on.
    pub fn target(&self) -> String {
        match self {
            Operation::Shell { command } => command.clone(),
            Operation::Mkdir { path } => path.display().to_string(),
            Operation::RemoveContainer { name, .. } | Operation::CreateNetwork { name } => {
                name.clone()
            }
            Operation::RunContainer(spec) => spec.name.clone(),
            Operation::BuildImage { image, .. } | Operation::PullImage { image } => image.clone(),
            Operation::Exec { container, .. } => container.clone(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.target())
    }
}

/// Result of executing one operation. A non-zero exit is a normal
/// `success == false` output, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl OperationOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    pub fn from_process(output: &std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }

    /// Best human-readable explanation of a failure.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_owned();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_owned();
        }
        match self.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_target() {
        let op = Operation::RemoveContainer {
            name: "moorage-go-container".to_owned(),
            force: true,
        };
        assert_eq!(op.to_string(), "remove_container moorage-go-container");
        assert_eq!(Operation::mkdir("/tmp/x").target(), "/tmp/x");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Operation::PullImage {
            image: "alpine:3".to_owned(),
        })
        .unwrap();
        assert_eq!(json["kind"], "pull_image");
        assert_eq!(json["image"], "alpine:3");
    }

    #[test]
    fn error_text_prefers_stderr_then_stdout() {
        let mut out = OperationOutput::failed("boom\n");
        assert_eq!(out.error_text(), "boom");
        out.stderr.clear();
        out.stdout = "partial".to_owned();
        assert_eq!(out.error_text(), "partial");
        out.stdout.clear();
        assert_eq!(out.error_text(), "exited with code 1");
    }
}
