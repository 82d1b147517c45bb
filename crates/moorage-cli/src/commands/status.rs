use super::{colorize_flag, json_pretty, EnvArgs, Settings, EXIT_SUCCESS};

pub fn run(settings: &Settings, env: &EnvArgs, json: bool) -> Result<u8, String> {
    let ctx = env.to_context()?;
    let store = settings.open_store();
    let key = ctx.state_key();
    let decision = store.check_rebuild_needed(&ctx);

    if json {
        let payload = serde_json::json!({
            "key": key,
            "stateFile": settings.state_file.display().to_string(),
            "stored": store.get(&key),
            "decision": decision,
            "anyActionNeeded": decision.any_action_needed(),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{key} ({})", settings.state_file.display());
    println!("  reason:                  {}", decision.reason);
    println!(
        "  image rebuild:           {}",
        colorize_flag(decision.image_rebuild_needed)
    );
    println!(
        "  container recreate:      {}",
        colorize_flag(decision.container_recreate_needed)
    );
    println!(
        "  tools image rebuild:     {}",
        colorize_flag(decision.oj_image_rebuild_needed)
    );
    println!(
        "  tools container recreate: {}",
        colorize_flag(decision.oj_container_recreate_needed)
    );
    Ok(EXIT_SUCCESS)
}
