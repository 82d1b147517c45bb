use crate::config::NamingConfig;
use crate::context::EnvContext;
use serde::{Deserialize, Serialize};

/// Content hash plus resolved names of an environment at its last
/// successful preparation.
///
/// Persisted keys keep the camelCase layout of the state file
/// (`dockerfileHash`, `imageName`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFingerprint {
    #[serde(default)]
    pub language: String,
    #[serde(rename = "dockerfileHash")]
    pub definition_hash: Option<String>,
    #[serde(rename = "ojDockerfileHash")]
    pub oj_definition_hash: Option<String>,
    pub image_name: String,
    pub oj_image_name: String,
    pub container_name: String,
    pub oj_container_name: String,
    pub last_updated: String,
}

/// Short blake3 digest of a definition's text.
pub fn definition_hash(content: &str) -> String {
    let hex = blake3::hash(content.as_bytes()).to_hex();
    hex[..12].to_owned()
}

pub fn compute_fingerprint(ctx: &EnvContext, naming: &NamingConfig) -> EnvironmentFingerprint {
    let names = ctx.names(naming);
    EnvironmentFingerprint {
        language: ctx.language.clone(),
        definition_hash: ctx.definition.as_deref().map(definition_hash),
        oj_definition_hash: ctx.oj_definition.as_deref().map(definition_hash),
        image_name: names.image,
        oj_image_name: names.oj_image,
        container_name: names.container,
        oj_container_name: names.oj_container,
        last_updated: chrono::Utc::now().to_rfc3339(),
    }
}

/// What must be rebuilt or recreated, compared to the stored fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RebuildDecision {
    pub image_rebuild_needed: bool,
    pub container_recreate_needed: bool,
    pub oj_image_rebuild_needed: bool,
    pub oj_container_recreate_needed: bool,
    pub reason: String,
}

impl RebuildDecision {
    pub fn everything(reason: impl Into<String>) -> Self {
        Self {
            image_rebuild_needed: true,
            container_recreate_needed: true,
            oj_image_rebuild_needed: true,
            oj_container_recreate_needed: true,
            reason: reason.into(),
        }
    }

    pub fn nothing() -> Self {
        Self {
            image_rebuild_needed: false,
            container_recreate_needed: false,
            oj_image_rebuild_needed: false,
            oj_container_recreate_needed: false,
            reason: "no changes detected".to_owned(),
        }
    }

    /// Compare a freshly computed fingerprint against the stored one.
    /// `last_updated` never takes part in the comparison.
    pub fn compare(stored: Option<&EnvironmentFingerprint>, current: &EnvironmentFingerprint) -> Self {
        let Some(stored) = stored else {
            return Self::everything("no previous state");
        };

        let image_rebuild_needed = stored.definition_hash != current.definition_hash;
        let oj_image_rebuild_needed = stored.oj_definition_hash != current.oj_definition_hash;
        let container_recreate_needed = image_rebuild_needed
            || stored.image_name != current.image_name
            || stored.container_name != current.container_name;
        let oj_container_recreate_needed = oj_image_rebuild_needed
            || stored.oj_image_name != current.oj_image_name
            || stored.oj_container_name != current.oj_container_name;

        let mut reasons = Vec::new();
        if image_rebuild_needed {
            reasons.push("definition changed");
        }
        if oj_image_rebuild_needed {
            reasons.push("tools definition changed");
        }
        if container_recreate_needed && !image_rebuild_needed {
            reasons.push("container naming changed");
        }
        if oj_container_recreate_needed && !oj_image_rebuild_needed {
            reasons.push("tools container naming changed");
        }

        if reasons.is_empty() {
            return Self::nothing();
        }
        Self {
            image_rebuild_needed,
            container_recreate_needed,
            oj_image_rebuild_needed,
            oj_container_recreate_needed,
            reason: reasons.join(", "),
        }
    }

    pub fn any_action_needed(&self) -> bool {
        self.image_rebuild_needed
            || self.container_recreate_needed
            || self.oj_image_rebuild_needed
            || self.oj_container_recreate_needed
    }
}
