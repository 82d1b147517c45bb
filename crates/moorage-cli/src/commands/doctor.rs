use super::{Settings, EXIT_FAILURE, EXIT_SUCCESS};
use moorage_runtime::{DockerDriver, Driver};
use moorage_store::{lock_path_for, StoreLock};
use std::process::Command;

pub fn run(settings: &Settings, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_docker(&mut checks, &mut all_pass);
    check_state(settings, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_docker(checks: &mut Vec<Check>, all_pass: &mut bool) {
    match Command::new("docker").arg("--version").output() {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_owned();
            checks.push(Check::pass("docker_binary", &version));
        }
        Ok(out) => {
            *all_pass = false;
            checks.push(Check::fail(
                "docker_binary",
                &format!(
                    "docker --version failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
            return;
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "docker_binary",
                &format!("docker client not found: {e}"),
            ));
            return;
        }
    }

    if DockerDriver::new().available() {
        checks.push(Check::pass("docker_daemon", "Docker daemon is reachable"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "docker_daemon",
            "Docker daemon is not reachable (is it running, and may this user access it?)",
        ));
    }
}

fn check_state(settings: &Settings, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let path = &settings.state_file;
    if path.exists() {
        let entries = settings.open_store().entries();
        checks.push(Check::info(
            "state_file",
            &format!("{} ({} fingerprint(s))", path.display(), entries.len()),
        ));
    } else {
        checks.push(Check::info(
            "state_file",
            &format!(
                "{} not created yet (written after the first successful prepare)",
                path.display()
            ),
        ));
        return;
    }

    match StoreLock::try_acquire(&lock_path_for(path)) {
        Ok(Some(_)) => checks.push(Check::pass("state_lock", "State lock is free")),
        Ok(None) => checks.push(Check::warn(
            "state_lock",
            "State lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_lock",
                &format!("Cannot check state lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("moorage doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
