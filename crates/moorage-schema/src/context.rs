use crate::config::NamingConfig;
use crate::types::StateKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything the engine knows about the environment being prepared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvContext {
    pub language: String,
    pub env_type: String,
    /// Contents of the main image definition (a Dockerfile for docker), if any.
    #[serde(default)]
    pub definition: Option<String>,
    /// Contents of the tools image definition, if any.
    #[serde(default)]
    pub oj_definition: Option<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
}

/// Resolved resource names for one environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvNames {
    pub image: String,
    pub container: String,
    pub oj_image: String,
    pub oj_container: String,
}

impl EnvContext {
    pub fn new(language: impl Into<String>, env_type: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            env_type: env_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    #[must_use]
    pub fn with_oj_definition(mut self, definition: impl Into<String>) -> Self {
        self.oj_definition = Some(definition.into());
        self
    }

    #[must_use]
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn state_key(&self) -> StateKey {
        StateKey::for_env(&self.language, &self.env_type)
    }

    pub fn names(&self, naming: &NamingConfig) -> EnvNames {
        let base = format!("{}-{}", naming.prefix, self.language.to_lowercase());
        EnvNames {
            container: format!("{base}-container"),
            oj_image: format!("{base}-oj"),
            oj_container: format!("{base}-oj-container"),
            image: base,
        }
    }
}

impl EnvNames {
    pub fn is_oj_container(&self, name: &str) -> bool {
        name == self.oj_container
    }

    /// The image a required container is expected to run from.
    pub fn image_for_container(&self, container: &str) -> &str {
        if self.is_oj_container(container) {
            &self.oj_image
        } else {
            &self.image
        }
    }
}
