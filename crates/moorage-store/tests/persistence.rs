//! Fingerprint state surviving across store instances, as it does across CLI runs.

use moorage_schema::{EnvContext, NamingConfig};
use moorage_store::{lock_path_for, FileBackend, FingerprintStore, StateStore, StoreLock};
use std::path::Path;

fn file_store(path: &Path) -> FingerprintStore {
    FingerprintStore::new(Box::new(FileBackend::new(path)), NamingConfig::default())
}

#[test]
fn update_is_visible_to_a_new_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fingerprints.json");
    let ctx = EnvContext::new("java", "docker").with_definition("FROM eclipse-temurin:21\n");

    file_store(&path).update_state(&ctx);

    let reopened = file_store(&path);
    assert!(!reopened.check_rebuild_needed(&ctx).any_action_needed());
    let fp = reopened.get("java_docker").unwrap();
    assert_eq!(fp.language, "java");
    assert_eq!(fp.container_name, "moorage-java-container");
}

#[test]
fn definition_edit_between_runs_triggers_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fingerprints.json");
    let before = EnvContext::new("java", "docker").with_definition("FROM eclipse-temurin:21\n");
    file_store(&path).update_state(&before);

    let after = before.clone().with_definition("FROM eclipse-temurin:22\n");
    let decision = file_store(&path).check_rebuild_needed(&after);
    assert!(decision.image_rebuild_needed);
    assert!(decision.container_recreate_needed);
    assert!(!decision.oj_image_rebuild_needed);
}

#[test]
fn clear_all_removes_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fingerprints.json");
    let store = file_store(&path);
    store.update_state(&EnvContext::new("c", "docker"));
    store.update_state(&EnvContext::new("cpp", "docker"));

    assert_eq!(file_store(&path).clear_state(None), 2);
    assert!(file_store(&path).entries().is_empty());
}

#[test]
fn lock_file_sits_next_to_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fingerprints.json");
    let lock_path = lock_path_for(&path);
    let held = StoreLock::acquire(&lock_path).unwrap();
    assert!(StoreLock::try_acquire(&lock_path).unwrap().is_none());
    drop(held);
    assert!(StoreLock::try_acquire(&lock_path).unwrap().is_some());
}
