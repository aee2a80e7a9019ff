//! JSON-file key/value store shared by every task.
//!
//! The file is read at lookup time and rewritten atomically (temp file +
//! rename) on every write. A process-wide async mutex serializes access
//! inside this process; an advisory lock on `<file>.lock` covers other
//! processes sharing the same file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory file {path} is not valid JSON: {reason}")]
    Corrupt { path: String, reason: String },
}

/// A persisted value with the time it was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: String,
    pub timestamp: String,
}

type Entries = BTreeMap<String, MemoryEntry>;

#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the file path with both locks held, off the async runtime.
    async fn with_file<T, F>(&self, exclusive: bool, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, MemoryError> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            // The lock file lives beside the data file, so its directory must exist first.
            std::fs::create_dir_all(parent_dir(&path))?;
            let lock_file = File::options()
                .create(true)
                .truncate(false)
                .write(true)
                .open(lock_path(&path))?;
            if exclusive {
                lock_file.lock_exclusive()?;
            } else {
                lock_file.lock_shared()?;
            }
            let result = f(&path);
            // Best effort; closing the handle releases the lock anyway.
            let _ = FileExt::unlock(&lock_file);
            result
        })
        .await
        .map_err(|e| MemoryError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Insert or overwrite `key`.
    pub async fn store(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let key = key.to_string();
        let entry = MemoryEntry {
            value: value.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.with_file(true, move |path| {
            let mut entries = load(path)?;
            entries.insert(key.clone(), entry);
            save(path, &entries)?;
            tracing::info!(key = %key, "Stored memory entry");
            Ok(())
        })
        .await
    }

    pub async fn retrieve(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let key = key.to_string();
        self.with_file(false, move |path| {
            Ok(load(path)?.get(&key).map(|e| e.value.clone()))
        })
        .await
    }

    /// Entries whose key or value contains `query` (case-insensitive), in key order.
    pub async fn search(&self, query: &str) -> Result<Vec<(String, String)>, MemoryError> {
        let query = query.to_lowercase();
        self.with_file(false, move |path| {
            Ok(load(path)?
                .into_iter()
                .filter(|(k, e)| {
                    k.to_lowercase().contains(&query) || e.value.to_lowercase().contains(&query)
                })
                .map(|(k, e)| (k, e.value))
                .collect())
        })
        .await
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn load(path: &Path) -> Result<Entries, MemoryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&contents).map_err(|e| MemoryError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn save(path: &Path, entries: &Entries) -> Result<(), MemoryError> {
    let dir = parent_dir(path);

    let contents = serde_json::to_string_pretty(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| MemoryError::Io(e.error))?;
    Ok(())
}
