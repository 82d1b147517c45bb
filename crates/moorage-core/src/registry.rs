use crate::classify::{ErrorClassifier, FailureClassifier};
use crate::inspect::{DockerInspector, ResourceInspector};
use crate::planner::{DockerPlanner, TaskPlanner};
use crate::CoreError;
use moorage_schema::{EngineConfig, EnvContext};
use moorage_store::StateStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Backend-specific collaborators for one preparation run.
///
/// The classifier keeps the run's error history, so a fresh bundle is built
/// for every run. The state store is shared across runs.
pub struct ProviderBundle {
    pub inspector: Box<dyn ResourceInspector>,
    pub planner: Box<dyn TaskPlanner>,
    pub store: Arc<dyn StateStore>,
    pub classifier: Box<dyn FailureClassifier>,
}

pub type ProviderFactory =
    Box<dyn Fn(&EnvContext, &EngineConfig) -> Result<ProviderBundle, CoreError> + Send + Sync>;

/// Provider factories keyed by environment type.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `docker` provider backed by `store`.
    pub fn with_docker(store: Arc<dyn StateStore>) -> Self {
        let mut registry = Self::new();
        registry.register(
            "docker",
            Box::new(move |ctx, config| {
                Ok(ProviderBundle {
                    inspector: Box::new(DockerInspector::new(ctx, config)),
                    planner: Box::new(DockerPlanner::new(ctx, config)),
                    store: Arc::clone(&store),
                    classifier: Box::new(ErrorClassifier::from_config(config)),
                })
            }),
        );
        registry
    }

    /// Register `factory` for `env_type`, replacing any earlier one.
    pub fn register(&mut self, env_type: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(env_type.into(), factory);
    }

    pub fn get(
        &self,
        env_type: &str,
        ctx: &EnvContext,
        config: &EngineConfig,
    ) -> Result<ProviderBundle, CoreError> {
        let factory = self
            .factories
            .get(env_type)
            .ok_or_else(|| CoreError::UnknownEnvType(env_type.to_owned()))?;
        factory(ctx, config)
    }

    pub fn env_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_schema::NamingConfig;
    use moorage_store::FingerprintStore;

    fn store() -> Arc<dyn StateStore> {
        Arc::new(FingerprintStore::in_memory(NamingConfig::default()))
    }

    #[test]
    fn docker_provider_is_registered() {
        let registry = ProviderRegistry::with_docker(store());
        assert_eq!(registry.env_types(), ["docker"]);
        let ctx = EnvContext::new("go", "docker");
        assert!(registry.get("docker", &ctx, &EngineConfig::default()).is_ok());
    }

    #[test]
    fn unknown_env_type_fails() {
        let registry = ProviderRegistry::with_docker(store());
        let ctx = EnvContext::new("go", "podman");
        assert!(matches!(
            registry.get("podman", &ctx, &EngineConfig::default()),
            Err(CoreError::UnknownEnvType(t)) if t == "podman"
        ));
    }

    #[test]
    fn factories_can_be_replaced_and_fail() {
        let mut registry = ProviderRegistry::with_docker(store());
        registry.register(
            "docker",
            Box::new(|_, _| {
                Err(CoreError::Provider {
                    env_type: "docker".to_owned(),
                    reason: "disabled".to_owned(),
                })
            }),
        );
        let ctx = EnvContext::new("go", "docker");
        assert!(matches!(
            registry.get("docker", &ctx, &EngineConfig::default()),
            Err(CoreError::Provider { .. })
        ));
    }
}
