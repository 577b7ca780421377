//! The event log: canonical ordered history of stroke events.
//!
//! The log lives in memory and is the authority. Every append (re)arms a
//! single save timer, so a burst of `draw` events from one gesture ends up
//! as one write once the burst settles. `clear` writes immediately so a
//! crash right after it cannot bring the old drawing back.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use scrawl_core::StrokeEvent;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::storage::{HistoryStorage, StorageError, StorageResult};

/// Default delay between the last append and the save it triggers.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// In-memory event log with debounced persistence.
pub struct EventLog {
    events: Arc<RwLock<Vec<StrokeEvent>>>,
    storage: Arc<dyn HistoryStorage>,
    debounce: Duration,
    /// The one pending save timer, if armed.
    pending_save: Option<JoinHandle<()>>,
    /// Incremented for every scheduled or immediate save.
    generation: u64,
    /// Generation of the newest state written to storage. Held while writing
    /// so writes never interleave and an older state never replaces a newer.
    persisted: Arc<Mutex<u64>>,
}

impl EventLog {
    /// Open the log, loading whatever history `storage` holds.
    ///
    /// A missing, empty or unreadable history starts the log empty.
    pub fn open(storage: Arc<dyn HistoryStorage>, debounce: Duration) -> Self {
        let events = match storage.load() {
            Ok(events) => {
                info!(count = events.len(), "Loaded drawing history");
                events
            }
            Err(StorageError::NotFound(what)) => {
                info!(%what, "No saved drawing history, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Could not load drawing history, starting empty");
                Vec::new()
            }
        };

        Self {
            events: Arc::new(RwLock::new(events)),
            storage,
            debounce,
            pending_save: None,
            generation: 0,
            persisted: Arc::new(Mutex::new(0)),
        }
    }

    /// Add an event to the end of the log and schedule a save.
    ///
    /// Must be called from within a tokio runtime.
    pub fn append(&mut self, event: StrokeEvent) {
        write_events(&self.events).push(event);
        self.schedule_save();
    }

    /// Empty the log and persist the empty history right away.
    pub fn clear(&mut self) {
        self.cancel_pending_save();
        write_events(&self.events).clear();
        if let Err(e) = self.persist_now() {
            error!(error = %e, "Failed to save cleared drawing history");
        }
    }

    /// Persist the current history right away, cancelling any pending save.
    pub fn flush(&mut self) -> StorageResult<()> {
        if self.has_pending_save() {
            debug!("Saving ahead of the pending debounced save");
        }
        self.cancel_pending_save();
        self.persist_now()
    }

    /// Point-in-time copy of the whole history.
    pub fn snapshot(&self) -> Vec<StrokeEvent> {
        read_events(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        read_events(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        read_events(&self.events).is_empty()
    }

    /// Whether a debounced save is armed and has not fired yet.
    pub fn has_pending_save(&self) -> bool {
        self.pending_save.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn persist_now(&mut self) -> StorageResult<()> {
        self.generation += 1;
        persist(&*self.storage, &self.events, &self.persisted, self.generation).map(|_| ())
    }

    fn schedule_save(&mut self) {
        self.cancel_pending_save();
        self.generation += 1;

        let generation = self.generation;
        let delay = self.debounce;
        let events = Arc::clone(&self.events);
        let storage = Arc::clone(&self.storage);
        let persisted = Arc::clone(&self.persisted);

        self.pending_save = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = tokio::task::spawn_blocking(move || {
                persist(&*storage, &events, &persisted, generation)
            })
            .await;
            match result {
                Ok(Ok(true)) => debug!(generation, "Saved drawing history"),
                Ok(Ok(false)) => debug!(generation, "Skipped save superseded by a newer one"),
                Ok(Err(e)) => error!(error = %e, "Failed to save drawing history"),
                Err(e) => error!(error = %e, "History save task failed"),
            }
        }));
    }

    fn cancel_pending_save(&mut self) {
        if let Some(task) = self.pending_save.take() {
            task.abort();
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.cancel_pending_save();
    }
}

/// Write the current history unless a newer generation is already on disk.
/// Returns whether a write happened.
fn persist(
    storage: &dyn HistoryStorage,
    events: &RwLock<Vec<StrokeEvent>>,
    persisted: &Mutex<u64>,
    generation: u64,
) -> StorageResult<bool> {
    let mut last = persisted.lock().unwrap_or_else(PoisonError::into_inner);
    if generation < *last {
        return Ok(false);
    }
    let snapshot = read_events(events).clone();
    storage.save(&snapshot)?;
    *last = generation;
    Ok(true)
}

fn read_events(events: &RwLock<Vec<StrokeEvent>>) -> RwLockReadGuard<'_, Vec<StrokeEvent>> {
    events.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_events(events: &RwLock<Vec<StrokeEvent>>) -> RwLockWriteGuard<'_, Vec<StrokeEvent>> {
    events.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use scrawl_core::StrokeAction;
    use scrawl_core::kurbo::Point;

    const SHORT: Duration = Duration::from_millis(30);

    fn event(i: usize) -> StrokeEvent {
        StrokeEvent::new(StrokeAction::Draw, Point::new(i as f64, i as f64), "#000000", 5.0)
    }

    async fn settle() {
        tokio::time::sleep(SHORT * 8).await;
    }

    #[tokio::test]
    async fn test_append_and_snapshot_keep_order() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage, SHORT);
        for i in 0..5 {
            log.append(event(i));
        }
        assert_eq!(log.len(), 5);
        assert_eq!(log.snapshot(), (0..5).map(event).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_burst_is_saved_once() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage.clone(), SHORT);

        for i in 0..40 {
            log.append(event(i));
        }
        assert!(log.has_pending_save());
        assert_eq!(storage.save_count(), 0);

        settle().await;
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.saved().unwrap().len(), 40);
        assert!(!log.has_pending_save());
    }

    #[tokio::test]
    async fn test_clear_saves_immediately() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage.clone(), Duration::from_secs(60));
        log.append(event(1));
        log.append(event(2));

        log.clear();
        assert!(log.is_empty());
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.saved().unwrap(), Vec::new());
        assert!(!log.has_pending_save());
    }

    #[tokio::test]
    async fn test_clear_cancels_pending_save() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage.clone(), SHORT);
        log.append(event(1));
        log.clear();

        settle().await;
        assert_eq!(storage.save_count(), 1);
        assert!(storage.saved().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_after_clear_is_saved_alone() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage.clone(), SHORT);
        log.append(event(1));
        log.clear();
        log.append(event(2));

        settle().await;
        assert_eq!(storage.saved().unwrap(), vec![event(2)]);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_saves(true);
        let mut log = EventLog::open(storage.clone(), SHORT);
        log.append(event(1));
        log.append(event(2));

        settle().await;
        assert_eq!(log.len(), 2);
        assert!(storage.saved().is_none());

        storage.set_fail_saves(false);
        log.flush().unwrap();
        assert_eq!(storage.saved().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_replaces_pending_save() {
        let storage = Arc::new(MemoryStorage::new());
        let mut log = EventLog::open(storage.clone(), SHORT);
        log.append(event(1));
        assert!(log.has_pending_save());

        log.flush().unwrap();
        assert!(!log.has_pending_save());

        settle().await;
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.saved().unwrap(), vec![event(1)]);
    }

    #[tokio::test]
    async fn test_open_loads_saved_history() {
        let storage = Arc::new(MemoryStorage::with_history(vec![event(7), event(8)]));
        let log = EventLog::open(storage, SHORT);
        assert_eq!(log.snapshot(), vec![event(7), event(8)]);
    }

    #[tokio::test]
    async fn test_open_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawing-history.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let storage = Arc::new(FileStorage::new(&path).unwrap());
        let log = EventLog::open(storage, SHORT);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawing-history.json");

        {
            let storage = Arc::new(FileStorage::new(&path).unwrap());
            let mut log = EventLog::open(storage, SHORT);
            log.append(event(1));
            log.append(event(2));
            settle().await;
        }

        let storage = Arc::new(FileStorage::new(&path).unwrap());
        let log = EventLog::open(storage, SHORT);
        assert_eq!(log.snapshot(), vec![event(1), event(2)]);
    }
}
