//! Environment fingerprint persistence for moorage.
//!
//! This crate owns the only long-lived state of the engine: the last
//! successful fingerprint per `<language>_<envType>` key. Storage is
//! pluggable through `StateBackend` (in-memory for tests, a JSON file with
//! atomic writes in production). `FingerprintStore` layers the rebuild
//! decision on top and never surfaces load/save failures to callers.
//! `StoreLock` serializes concurrent preparations of the same store.

pub mod backend;
pub mod fingerprint;
pub mod lock;

pub use backend::{FileBackend, MemoryBackend, StateBackend, StateDocument};
pub use fingerprint::{FingerprintStore, StateStore};
pub use lock::{lock_path_for, StoreLock};

use std::path::Path;
use thiserror::Error;

/// Default location of the fingerprint file, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".moorage/fingerprints.json";

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_lock_failed() {
        let e = StoreError::LockFailed("held by another process".to_owned());
        assert!(e.to_string().contains("lock acquisition failed"));
    }

    #[test]
    fn fsync_dir_on_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        fsync_dir(dir.path()).unwrap();
    }
}
