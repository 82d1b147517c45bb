use crate::backend::{StateBackend, StateDocument};
use moorage_schema::{
    compute_fingerprint, EnvContext, EnvironmentFingerprint, NamingConfig, RebuildDecision,
};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Long-lived fingerprint state as seen by the orchestrator.
///
/// Implementations never fail: unreadable state is treated as absent and
/// unwritable state is logged and dropped.
pub trait StateStore: Send + Sync {
    fn check_rebuild_needed(&self, ctx: &EnvContext) -> RebuildDecision;
    fn update_state(&self, ctx: &EnvContext);
    /// Remove one entry, or every entry when `key` is `None`. Returns how many were removed.
    fn clear_state(&self, key: Option<&str>) -> usize;
    fn get(&self, key: &str) -> Option<EnvironmentFingerprint>;
    fn entries(&self) -> StateDocument;
}

pub struct FingerprintStore {
    backend: Box<dyn StateBackend>,
    naming: NamingConfig,
    // Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl FingerprintStore {
    pub fn new(backend: Box<dyn StateBackend>, naming: NamingConfig) -> Self {
        Self {
            backend,
            naming,
            write_guard: Mutex::new(()),
        }
    }

    pub fn in_memory(naming: NamingConfig) -> Self {
        Self::new(Box::new(crate::MemoryBackend::new()), naming)
    }

    fn load(&self) -> StateDocument {
        match self.backend.load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    "failed to load fingerprint state from {}: {e}; treating as empty",
                    self.backend.describe()
                );
                StateDocument::new()
            }
        }
    }

    fn save(&self, doc: &StateDocument) {
        if let Err(e) = self.backend.save(doc) {
            warn!(
                "failed to save fingerprint state to {}: {e}",
                self.backend.describe()
            );
        }
    }
}

impl StateStore for FingerprintStore {
    fn check_rebuild_needed(&self, ctx: &EnvContext) -> RebuildDecision {
        let key = ctx.state_key();
        let doc = self.load();
        let current = compute_fingerprint(ctx, &self.naming);
        let decision = RebuildDecision::compare(doc.get(key.as_str()), &current);
        debug!("rebuild decision for {key}: {}", decision.reason);
        decision
    }

    fn update_state(&self, ctx: &EnvContext) {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = ctx.state_key();
        let mut doc = self.load();
        doc.insert(key.into_inner(), compute_fingerprint(ctx, &self.naming));
        self.save(&doc);
    }

    fn clear_state(&self, key: Option<&str>) -> usize {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load();
        let removed = match key {
            Some(k) => usize::from(doc.remove(k).is_some()),
            None => {
                let n = doc.len();
                doc.clear();
                n
            }
        };
        if removed > 0 {
            self.save(&doc);
        }
        removed
    }

    fn get(&self, key: &str) -> Option<EnvironmentFingerprint> {
        self.load().remove(key)
    }

    fn entries(&self) -> StateDocument {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileBackend;

    fn ctx() -> EnvContext {
        EnvContext::new("python", "docker").with_definition("FROM python:3.12\n")
    }

    #[test]
    fn fresh_store_rebuilds_everything() {
        let store = FingerprintStore::in_memory(NamingConfig::default());
        let decision = store.check_rebuild_needed(&ctx());
        assert!(decision.any_action_needed());
        assert_eq!(decision.reason, "no previous state");
    }

    #[test]
    fn check_is_idempotent() {
        let store = FingerprintStore::in_memory(NamingConfig::default());
        assert_eq!(
            store.check_rebuild_needed(&ctx()),
            store.check_rebuild_needed(&ctx())
        );
        store.update_state(&ctx());
        assert_eq!(
            store.check_rebuild_needed(&ctx()),
            store.check_rebuild_needed(&ctx())
        );
    }

    #[test]
    fn update_then_check_needs_nothing() {
        let store = FingerprintStore::in_memory(NamingConfig::default());
        store.update_state(&ctx());
        let decision = store.check_rebuild_needed(&ctx());
        assert!(!decision.image_rebuild_needed);
        assert!(!decision.container_recreate_needed);
        assert!(!decision.oj_image_rebuild_needed);
        assert!(!decision.oj_container_recreate_needed);
    }

    #[test]
    fn keys_do_not_interfere() {
        let store = FingerprintStore::in_memory(NamingConfig::default());
        store.update_state(&ctx());
        let other = EnvContext::new("rust", "docker");
        assert!(store.check_rebuild_needed(&other).any_action_needed());
        assert!(store.get("python_docker").is_some());
        assert!(store.get("rust_docker").is_none());
    }

    #[test]
    fn clear_one_and_all() {
        let store = FingerprintStore::in_memory(NamingConfig::default());
        store.update_state(&ctx());
        store.update_state(&EnvContext::new("rust", "docker"));
        assert_eq!(store.clear_state(Some("python_docker")), 1);
        assert_eq!(store.clear_state(Some("python_docker")), 0);
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.clear_state(None), 1);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn corrupt_file_degrades_to_no_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = FingerprintStore::new(Box::new(FileBackend::new(&path)), NamingConfig::default());
        assert_eq!(store.check_rebuild_needed(&ctx()).reason, "no previous state");

        // A successful update overwrites the corrupt file.
        store.update_state(&ctx());
        assert!(!store.check_rebuild_needed(&ctx()).any_action_needed());
    }

    #[test]
    fn unwritable_file_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not dir").unwrap();
        let store = FingerprintStore::new(
            Box::new(FileBackend::new(blocker.join("state.json"))),
            NamingConfig::default(),
        );
        store.update_state(&ctx());
        assert!(store.check_rebuild_needed(&ctx()).any_action_needed());
    }
}
