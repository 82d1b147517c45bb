use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error categories a retry allow-list may name.
pub const RETRY_CATEGORY_NAMES: &[&str] = &[
    "daemon",
    "image",
    "container",
    "build",
    "network",
    "filesystem",
    "resource",
    "configuration",
];

/// Keys accepted under `[error_patterns]`.
pub const ERROR_PATTERN_KEYS: &[&str] = &[
    "daemon_connection",
    "image_not_found",
    "container_conflict",
    "build_error",
    "network_error",
    "filesystem_error",
    "resource_error",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("execution.max_workers must be at least 1")]
    ZeroWorkers,
    #[error("retry.backoff_factor must be >= 1.0, got {0}")]
    InvalidBackoffFactor(f64),
    #[error("retry.jitter_range must be within 0.0..=1.0, got {0}")]
    InvalidJitterRange(f64),
    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayBounds { base: u64, max: u64 },
    #[error("unknown retryable category '{0}'")]
    UnknownCategory(String),
    #[error("unknown error pattern key '{0}'")]
    UnknownPatternKey(String),
    #[error("error_patterns.{0} contains an empty pattern")]
    EmptyPattern(String),
    #[error("naming.prefix must not be empty")]
    EmptyPrefix,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
    Jittered,
}

/// Engine configuration, usually read from `moorage.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub error_patterns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter_range")]
    pub jitter_range: f64,
    #[serde(default = "default_retryable_categories")]
    pub retryable_categories: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_range: default_jitter_range(),
            retryable_categories: default_retryable_categories(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_true")]
    pub parallel_groups: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            parallel_groups: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default = "default_keep_alive")]
    pub keep_alive_command: String,
    #[serde(default = "default_workspace")]
    pub mount_path: String,
    #[serde(default = "default_workspace")]
    pub working_directory: String,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            keep_alive_command: default_keep_alive(),
            mount_path: default_workspace(),
            working_directory: default_workspace(),
            memory_limit: None,
            cpu_limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_range() -> f64 {
    0.1
}

fn default_retryable_categories() -> Vec<String> {
    ["daemon", "container", "network"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_max_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "moorage".to_owned()
}

fn default_keep_alive() -> String {
    "tail -f /dev/null".to_owned()
}

fn default_workspace() -> String {
    "/workspace".to_owned()
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if retry.backoff_factor < 1.0 || retry.backoff_factor.is_nan() {
            return Err(ConfigError::InvalidBackoffFactor(retry.backoff_factor));
        }
        if !(0.0..=1.0).contains(&retry.jitter_range) {
            return Err(ConfigError::InvalidJitterRange(retry.jitter_range));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::DelayBounds {
                base: retry.base_delay_ms,
                max: retry.max_delay_ms,
            });
        }
        if let Some(bad) = retry
            .retryable_categories
            .iter()
            .find(|c| !RETRY_CATEGORY_NAMES.contains(&c.as_str()))
        {
            return Err(ConfigError::UnknownCategory(bad.clone()));
        }
        if self.execution.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.naming.prefix.trim().is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if let Some(bad) = self
            .error_patterns
            .keys()
            .find(|k| !ERROR_PATTERN_KEYS.contains(&k.as_str()))
        {
            return Err(ConfigError::UnknownPatternKey(bad.clone()));
        }
        // An empty substring would match every failure.
        if let Some((key, _)) = self
            .error_patterns
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.trim().is_empty()))
        {
            return Err(ConfigError::EmptyPattern(key.clone()));
        }
        Ok(())
    }

    /// Extra patterns configured for `key`, lowercased.
    pub fn patterns_for(&self, key: &str) -> Vec<String> {
        self.error_patterns
            .get(key)
            .map(|list| list.iter().map(|p| p.to_lowercase()).collect())
            .unwrap_or_default()
    }
}

pub fn parse_config_str(input: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
