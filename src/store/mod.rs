//! JSON document store
//!
//! Handles persistence of the shared booking document:
//! - Schema backfill on load
//! - Atomic saves (temp file in the same directory, then rename)
//! - Whole-document advisory locking around every read-modify-write

pub mod lock;

pub use lock::{lock_path_for, FileLock, LockError, LockOptions, ProcessProbe, ProcfsProbe};

use crate::models::document::{backfill, Document};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Failed to access document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    /// Lock contention outlasted the deadline; safe to retry later
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::Lock(LockError::Timeout { .. }))
    }
}

/// Read the document without locking; a missing file is an empty document
pub fn load(path: &Path) -> StoreResult<Document> {
    if !path.exists() {
        return Ok(Document::default());
    }

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parse_err = |source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let content = fs::read_to_string(path).map_err(io_err)?;
    let mut raw: Value = if content.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&content).map_err(parse_err)?
    };

    let touched = backfill(&mut raw);
    if touched > 0 {
        tracing::debug!(path = %path.display(), touched, "backfilled document schema");
    }

    serde_json::from_value(raw).map_err(parse_err)
}

/// Write the document atomically without locking
///
/// The content goes to a temporary file next to the target which is flushed,
/// synced and renamed over it, so readers see either the old or the new file.
pub fn save(doc: &Document, path: &Path) -> StoreResult<()> {
    let content = serde_json::to_string_pretty(doc)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => {
            return Err(StoreError::InvalidPath(format!(
                "{} has no parent directory",
                path.display()
            )))
        }
    };
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(&parent).map_err(io_err)?;

    let mut temp_file = NamedTempFile::new_in(&parent).map_err(io_err)?;
    temp_file.write_all(content.as_bytes()).map_err(io_err)?;
    temp_file.flush().map_err(io_err)?;
    temp_file.as_file().sync_all().map_err(io_err)?;

    temp_file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Handle to one locked JSON document
#[derive(Clone)]
pub struct DocumentStore {
    path: PathBuf,
    options: LockOptions,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: LockOptions::default(),
            probe: Arc::new(ProcfsProbe),
        }
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    pub fn lock(&self) -> StoreResult<FileLock> {
        Ok(FileLock::acquire_with_probe(
            self.lock_path(),
            self.options,
            self.probe.as_ref(),
        )?)
    }

    /// Load under the lock
    pub fn load(&self) -> StoreResult<Document> {
        let guard = self.lock()?;
        let doc = load(&self.path)?;
        guard.release()?;
        Ok(doc)
    }

    /// Save under the lock
    pub fn save(&self, doc: &Document) -> StoreResult<()> {
        let guard = self.lock()?;
        save(doc, &self.path)?;
        guard.release()?;
        Ok(())
    }

    /// Read-modify-write in one critical section
    ///
    /// The document is saved only when `f` succeeds; on error nothing is
    /// written and the lock is still released.
    pub fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Document) -> Result<T, E>,
        E: From<StoreError>,
    {
        let guard = self.lock().map_err(E::from)?;
        let mut doc = load(&self.path).map_err(E::from)?;
        let value = f(&mut doc)?;
        save(&doc, &self.path).map_err(E::from)?;
        guard.release().map_err(|e| E::from(StoreError::from(e)))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventRecord;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_empty_document() {
        let temp = TempDir::new().unwrap();
        let doc = load(&temp.path().join("events.json")).unwrap();
        assert!(doc.events.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.json");

        let mut doc = Document::default();
        doc.insert_event(EventRecord::with_id("evt-1"));
        save(&doc, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.event("evt-1").is_some());

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_load_rejects_corrupt_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load(&path), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_transact_saves_on_success_and_releases_lock() {
        let temp = TempDir::new().unwrap();
        let store = DocumentStore::new(temp.path().join("events.json"));

        store
            .transact(|doc| -> StoreResult<()> {
                doc.insert_event(EventRecord::with_id("evt-1"));
                Ok(())
            })
            .unwrap();

        assert!(!store.lock_path().exists());
        assert!(store.load().unwrap().event("evt-1").is_some());
    }

    #[test]
    fn test_transact_discards_changes_on_error() {
        let temp = TempDir::new().unwrap();
        let store = DocumentStore::new(temp.path().join("events.json"));

        let result = store.transact(|doc| -> anyhow::Result<()> {
            doc.insert_event(EventRecord::with_id("evt-1"));
            anyhow::bail!("handler failed")
        });

        assert!(result.is_err());
        assert!(!store.lock_path().exists());
        assert!(store.load().unwrap().events.is_empty());
    }

    #[test]
    fn test_held_lock_times_out_transact() {
        let temp = TempDir::new().unwrap();
        let store = DocumentStore::new(temp.path().join("events.json")).with_lock_options(
            LockOptions {
                timeout: std::time::Duration::from_millis(100),
                poll_interval: std::time::Duration::from_millis(10),
                stale_after: std::time::Duration::from_secs(300),
            },
        );

        let _held = store.lock().unwrap();
        let err = store.load().unwrap_err();
        assert!(err.is_lock_timeout());
    }
}
