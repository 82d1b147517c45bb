//! Resource model, environment context, fingerprints, and configuration for moorage.
//!
//! This crate defines the value layer shared by every other crate: resource
//! requirements and observed statuses (`ResourceRequirement`, `ResourceStatus`),
//! opaque workflow steps (`Step`), the environment being prepared (`EnvContext`),
//! content fingerprints and the rebuild decision derived from them
//! (`EnvironmentFingerprint`, `RebuildDecision`), and the TOML engine configuration
//! (`EngineConfig`).

pub mod config;
pub mod context;
pub mod fingerprint;
pub mod resource;
pub mod step;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, BackoffStrategy, ConfigError, ContainerConfig,
    EngineConfig, ExecutionConfig, NamingConfig, RetryConfig, StateConfig, ERROR_PATTERN_KEYS,
    RETRY_CATEGORY_NAMES,
};
pub use context::{EnvContext, EnvNames};
pub use fingerprint::{compute_fingerprint, definition_hash, EnvironmentFingerprint, RebuildDecision};
pub use resource::{
    resource_key, CurrentState, DesiredState, PrepAction, ResourceRequirement, ResourceStatus,
    ResourceType, StatusMap,
};
pub use step::Step;
pub use types::{StateKey, TaskId};
