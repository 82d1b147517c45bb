use super::{json_pretty, Settings, EXIT_SUCCESS};
use moorage_store::{lock_path_for, StoreLock};

pub fn run(settings: &Settings, key: Option<&str>, json: bool) -> Result<u8, String> {
    let _lock = StoreLock::acquire(&lock_path_for(&settings.state_file))
        .map_err(|e| format!("store lock: {e}"))?;
    let removed = settings.open_store().clear_state(key);

    if json {
        let payload = serde_json::json!({
            "key": key,
            "removed": removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match key {
            Some(k) if removed == 0 => println!("no fingerprint stored for {k}"),
            Some(k) => println!("cleared fingerprint for {k}"),
            None => println!("cleared {removed} fingerprint(s)"),
        }
    }
    Ok(EXIT_SUCCESS)
}
