use moorage_schema::{DesiredState, ResourceRequirement, ResourceType, Step};
use std::collections::HashSet;
use std::path::Path;

/// Derive resource requirements from workflow steps.
///
/// Requirements are de-duplicated by `(type, identifier)`, keeping the
/// order of first occurrence. Steps of unknown kinds contribute nothing.
pub fn extract_requirements(steps: &[Step]) -> Vec<ResourceRequirement> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        for req in requirements_for(step) {
            if seen.insert(req.key()) {
                out.push(req.with_context("step_index", index.to_string()));
            }
        }
    }
    out
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn field_or_target<'a>(field: Option<&'a str>, step: &'a Step) -> Option<&'a str> {
    non_empty(field).or_else(|| non_empty(Some(step.target.as_str())))
}

fn container(name: &str, step: &Step) -> ResourceRequirement {
    ResourceRequirement::new(ResourceType::Container, name, DesiredState::Running)
        .with_context("step_type", step.kind.clone())
}

fn directory(path: &str, step: &Step) -> ResourceRequirement {
    ResourceRequirement::new(ResourceType::Directory, path, DesiredState::Exists)
        .with_context("step_type", step.kind.clone())
}

fn parent_dir(path: &str) -> Option<String> {
    let parent = Path::new(path).parent()?;
    let s = parent.to_string_lossy();
    if s.is_empty() {
        None
    } else {
        Some(s.into_owned())
    }
}

/// Split `container:path`; plain paths have no container.
fn split_container_path(spec: &str) -> (Option<&str>, &str) {
    match spec.split_once(':') {
        Some((name, path)) if !name.is_empty() && !name.contains('/') => (Some(name), path),
        _ => (None, spec),
    }
}

fn copy_requirements(
    step: &Step,
    explicit_container: Option<&str>,
    source: Option<&str>,
    destination: &str,
) -> Vec<ResourceRequirement> {
    let (dest_container, dest_path) = split_container_path(destination);
    let source_container = source.and_then(|s| split_container_path(s).0);
    let mut reqs = Vec::new();
    if let Some(name) = non_empty(explicit_container)
        .or(dest_container)
        .or(source_container)
    {
        reqs.push(container(name, step));
    }
    if let Some(parent) = parent_dir(dest_path) {
        reqs.push(directory(&parent, step));
    }
    reqs
}

/// `docker exec` options that consume the following word.
const EXEC_VALUE_FLAGS: &[&str] = &[
    "-w",
    "--workdir",
    "-e",
    "--env",
    "-u",
    "--user",
    "--env-file",
    "--detach-keys",
];

/// Positional words of a docker subcommand, skipping options and the values
/// of options listed in `value_flags` (`--flag=value` is a single word).
fn positional_args<'a>(words: &[&'a str], value_flags: &[&str]) -> Vec<&'a str> {
    let mut args = Vec::new();
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        if value_flags.contains(word) {
            iter.next();
        } else if !word.starts_with('-') {
            args.push(*word);
        }
    }
    args
}

fn shell_requirements(step: &Step, command: &str) -> Vec<ResourceRequirement> {
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["docker", "exec", rest @ ..] => positional_args(rest, EXEC_VALUE_FLAGS)
            .first()
            .map(|name| vec![container(name, step)])
            .unwrap_or_default(),
        ["docker", "cp", rest @ ..] => match positional_args(rest, &[]).as_slice() {
            [source, destination, ..] => copy_requirements(step, None, Some(*source), destination),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn requirements_for(step: &Step) -> Vec<ResourceRequirement> {
    match step.kind.as_str() {
        "docker_exec" | "docker_run" => field_or_target(step.container.as_deref(), step)
            .map(|name| vec![container(name, step)])
            .unwrap_or_default(),
        "docker_cp" => {
            let destination = field_or_target(step.destination.as_deref(), step);
            match destination {
                Some(dest) => copy_requirements(step, step.container.as_deref(), None, dest),
                None => field_or_target(step.container.as_deref(), step)
                    .map(|name| vec![container(name, step)])
                    .unwrap_or_default(),
            }
        }
        "shell" => step
            .command
            .as_deref()
            .map(|cmd| shell_requirements(step, cmd))
            .unwrap_or_default(),
        "pull_image" | "build_image" => field_or_target(step.image.as_deref(), step)
            .map(|image| {
                vec![ResourceRequirement::new(
                    ResourceType::Image,
                    image,
                    DesiredState::Available,
                )
                .with_context("step_type", step.kind.clone())]
            })
            .unwrap_or_default(),
        "network" => field_or_target(step.network.as_deref(), step)
            .map(|name| {
                vec![ResourceRequirement::new(
                    ResourceType::Network,
                    name,
                    DesiredState::Exists,
                )
                .with_context("step_type", step.kind.clone())]
            })
            .unwrap_or_default(),
        "mkdir" => non_empty(Some(step.target.as_str()))
            .map(|path| vec![directory(path, step)])
            .unwrap_or_default(),
        "copy" | "move" | "touch" => non_empty(Some(step.target.as_str()))
            .and_then(parent_dir)
            .map(|parent| vec![directory(&parent, step)])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
