use crate::{fsync_dir, StoreError};
use moorage_schema::EnvironmentFingerprint;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

/// The whole persisted state: fingerprint per `<language>_<envType>` key.
pub type StateDocument = BTreeMap<String, EnvironmentFingerprint>;

/// Where a `FingerprintStore` loads and saves its document.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<StateDocument, StoreError>;
    fn save(&self, doc: &StateDocument) -> Result<(), StoreError>;
    fn describe(&self) -> String;
}

/// Memory-only backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    doc: Mutex<StateDocument>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: StateDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<StateDocument, StoreError> {
        Ok(self
            .doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, doc: &StateDocument) -> Result<(), StoreError> {
        *self.doc.lock().unwrap_or_else(PoisonError::into_inner) = doc.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

/// JSON file backend. Writes go through a temp file in the same directory
/// followed by an atomic rename.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<StateDocument, StoreError> {
        if !self.path.exists() {
            return Ok(StateDocument::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StateDocument::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, doc: &StateDocument) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(doc)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
