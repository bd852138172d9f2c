//! File-backed set of message identifiers that have already been handled.
//!
//! The file is a JSON array of strings. It is read once at startup and
//! rewritten in full (temp file + rename) whenever the poller persists.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Durable dedup set.
#[derive(Debug)]
pub struct ProcessedIds {
    path: PathBuf,
    ids: HashSet<String>,
    dirty: bool,
}

impl ProcessedIds {
    /// An empty set backed by `path`. Nothing is read or written.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: HashSet::new(),
            dirty: false,
        }
    }

    /// Load the set, degrading to empty when the file is missing or unusable.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Starting with an empty processed set");
                Self::empty(path)
            }
        }
    }

    /// Load the set. A missing file is an empty set, not an error.
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No processed-id file yet");
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), count = ids.len(), "Loaded processed ids");
        Ok(Self {
            path: path.to_path_buf(),
            ids: ids.into_iter().collect(),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Mark `id` as handled. Returns `false` if it was already present.
    pub fn record(&mut self, id: impl Into<String>) -> bool {
        let inserted = self.ids.insert(id.into());
        self.dirty |= inserted;
        inserted
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether there are records not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Owned copy of the current ids, for handing to blocking tasks.
    pub fn snapshot(&self) -> HashSet<String> {
        self.ids.clone()
    }

    /// Overwrite the file with the full current set.
    pub async fn persist(&mut self) -> Result<(), StoreError> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let json = serde_json::to_string(&ids)?;

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = temp_path(&self.path);
        fs::write(&tmp, json).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(path = %self.path.display(), count = ids.len(), "Persisted processed ids");
        self.dirty = false;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "processed_ids".into());
    name.push(".tmp");
    path.with_file_name(name)
}
