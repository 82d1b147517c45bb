pub mod clear;
pub mod doctor;
pub mod prepare;
pub mod status;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use moorage_schema::{parse_config_file, EngineConfig, EnvContext, Step};
use moorage_store::{FileBackend, FingerprintStore, StateStore, DEFAULT_STATE_FILE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

const DEFAULT_CONFIG_FILE: &str = "moorage.toml";

/// Engine configuration plus the resolved fingerprint file.
pub struct Settings {
    pub config: EngineConfig,
    pub state_file: PathBuf,
}

impl Settings {
    /// `--config` must exist when given; otherwise `moorage.toml` is used if present.
    /// The state file is `--state`, then `[state] file`, then the default.
    pub fn load(config_path: Option<&Path>, state_override: Option<&Path>) -> Result<Self, String> {
        let config = match config_path {
            Some(path) => parse_config_file(path)
                .map_err(|e| format!("config error: {}: {e}", path.display()))?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                parse_config_file(DEFAULT_CONFIG_FILE)
                    .map_err(|e| format!("config error: {DEFAULT_CONFIG_FILE}: {e}"))?
            }
            None => EngineConfig::default(),
        };
        let state_file = state_override
            .map(Path::to_path_buf)
            .or_else(|| config.state.file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        Ok(Self { config, state_file })
    }

    pub fn open_store(&self) -> Arc<dyn StateStore> {
        Arc::new(FingerprintStore::new(
            Box::new(FileBackend::new(&self.state_file)),
            self.config.naming.clone(),
        ))
    }
}

/// Flags describing the environment being prepared.
#[derive(Debug, Clone, Args)]
pub struct EnvArgs {
    /// Language of the environment (e.g. python, cpp).
    #[arg(long)]
    pub language: String,
    /// Environment type; selects the provider.
    #[arg(long, default_value = "docker")]
    pub env_type: String,
    /// Main image definition (Dockerfile).
    #[arg(long)]
    pub definition: Option<PathBuf>,
    /// Tools image definition.
    #[arg(long)]
    pub oj_definition: Option<PathBuf>,
    /// Project directory mounted into the containers.
    #[arg(long)]
    pub project: Option<PathBuf>,
}

impl EnvArgs {
    pub fn to_context(&self) -> Result<EnvContext, String> {
        let mut ctx = EnvContext::new(&self.language, &self.env_type);
        if let Some(path) = &self.definition {
            ctx = ctx.with_definition(read_file(path)?);
        }
        if let Some(path) = &self.oj_definition {
            ctx = ctx.with_oj_definition(read_file(path)?);
        }
        if let Some(dir) = &self.project {
            let dir = dir
                .canonicalize()
                .map_err(|e| format!("project directory {}: {e}", dir.display()))?;
            ctx = ctx.with_project_path(dir);
        }
        Ok(ctx)
    }
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))
}

/// Steps from a JSON array file; no file means no steps.
pub fn load_steps(path: Option<&Path>) -> Result<Vec<Step>, String> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = read_file(path)?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse steps {}: {e}", path.display()))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_flag(needed: bool) -> String {
    use console::Style;
    if needed {
        Style::new().yellow().apply_to("yes").to_string()
    } else {
        Style::new().green().apply_to("no").to_string()
    }
}
