//! File-based history storage.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use scrawl_core::StrokeEvent;
use tracing::warn;

use super::{HistoryStorage, StorageError, StorageResult};

/// Stores the history as a JSON array in a single file.
///
/// Saves go to a sibling `.tmp` file that is then renamed over the target,
/// so an interrupted write never leaves a truncated history behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create a file storage at `path`.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Io(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        Ok(Self { path })
    }

    /// Path of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl HistoryStorage for FileStorage {
    fn load(&self) -> StorageResult<Vec<StrokeEvent>> {
        if !self.path.exists() {
            return Err(StorageError::NotFound(self.path.display().to_string()));
        }

        let json = fs::read_to_string(&self.path).map_err(|e| {
            StorageError::Io(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }

        let events: Vec<StrokeEvent> = serde_json::from_str(&json).map_err(|e| {
            StorageError::Serialization(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        let total = events.len();
        let valid: Vec<StrokeEvent> = events.into_iter().filter(|e| e.validate().is_ok()).collect();
        if valid.len() != total {
            warn!(
                path = %self.path.display(),
                dropped = total - valid.len(),
                "Dropped invalid entries from saved history"
            );
        }
        Ok(valid)
    }

    fn save(&self, events: &[StrokeEvent]) -> StorageResult<()> {
        let json = serde_json::to_vec(events).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| {
            StorageError::Io(format!("Failed to write {}: {}", temp.display(), e))
        })?;
        fs::rename(&temp, &self.path).map_err(|e| {
            StorageError::Io(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}
