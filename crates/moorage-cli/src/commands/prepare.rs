use super::{
    json_pretty, load_steps, spin_fail, spin_ok, spinner, EnvArgs, Settings, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use moorage_core::{Orchestrator, PreparationResult, ProviderRegistry};
use moorage_runtime::select_driver;
use moorage_store::{lock_path_for, StoreLock};
use std::path::Path;

pub fn run(
    settings: &Settings,
    env: &EnvArgs,
    steps_file: Option<&Path>,
    driver_name: &str,
    if_changed: bool,
    json: bool,
) -> Result<u8, String> {
    let ctx = env.to_context()?;
    let steps = load_steps(steps_file)?;
    let driver = select_driver(driver_name).map_err(|e| e.to_string())?;

    let _lock = StoreLock::acquire(&lock_path_for(&settings.state_file))
        .map_err(|e| format!("store lock: {e}"))?;

    let orchestrator = Orchestrator::new(
        ProviderRegistry::with_docker(settings.open_store()),
        settings.config.clone(),
    );

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("preparing {}...", ctx.state_key())))
    };

    let result = if if_changed {
        orchestrator.prepare_if_needed(&ctx, &steps, driver.as_ref())
    } else {
        Some(orchestrator.prepare(&ctx, &steps, driver.as_ref()))
    };

    let Some(result) = result else {
        if let Some(ref pb) = pb {
            spin_ok(pb, "environment unchanged, nothing to do");
        }
        if json {
            let payload = serde_json::json!({
                "key": ctx.state_key(),
                "skipped": true,
            });
            println!("{}", json_pretty(&payload)?);
        }
        return Ok(EXIT_SUCCESS);
    };

    if let Some(ref pb) = pb {
        if result.success {
            spin_ok(pb, "environment prepared");
        } else {
            spin_fail(pb, "preparation failed");
        }
    }

    if json {
        println!("{}", json_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(if result.success {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn print_summary(result: &PreparationResult) {
    if let Some(decision) = &result.decision {
        println!("reason: {}", decision.reason);
    }
    println!(
        "tasks: {} total, {} succeeded, {} failed ({} ms)",
        result.tasks.len(),
        result.successful_tasks.len(),
        result.failed_tasks.len(),
        result.elapsed.as_millis()
    );
    for outcome in &result.outcomes {
        let mark = if outcome.success { "✓" } else { "✗" };
        let retries = if outcome.attempts > 1 {
            format!(" after {} attempts", outcome.attempts)
        } else {
            String::new()
        };
        println!("  {mark} {} {}{retries}", outcome.task_id, outcome.description);
    }
    for message in &result.error_messages {
        eprintln!("  {message}");
    }
    if let Some(report) = result.report.as_ref().filter(|r| r.has_errors()) {
        println!("suggestions:");
        for hint in &report.recommendations {
            println!("  - {hint}");
        }
    }
}
