//! In-memory history storage.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use scrawl_core::StrokeEvent;

use super::{HistoryStorage, StorageError, StorageResult};

/// In-memory storage for testing and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    saved: RwLock<Option<Vec<StrokeEvent>>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that already holds `events`.
    pub fn with_history(events: Vec<StrokeEvent>) -> Self {
        Self {
            saved: RwLock::new(Some(events)),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved history, if any.
    pub fn saved(&self) -> Option<Vec<StrokeEvent>> {
        self.saved.read().ok().and_then(|saved| saved.clone())
    }

    /// Make every following save fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl HistoryStorage for MemoryStorage {
    fn load(&self) -> StorageResult<Vec<StrokeEvent>> {
        let saved = self
            .saved
            .read()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        saved
            .clone()
            .ok_or_else(|| StorageError::NotFound("memory".to_string()))
    }

    fn save(&self, events: &[StrokeEvent]) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Io("simulated write failure".to_string()));
        }
        let mut saved = self
            .saved
            .write()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        *saved = Some(events.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
