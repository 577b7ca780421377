//! Storage abstraction for the drawing history.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use scrawl_core::StrokeEvent;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("History not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Backend holding the persisted copy of the event log.
///
/// Calls block; the event log runs them on tokio's blocking pool except for
/// the explicit synchronous flushes.
pub trait HistoryStorage: Send + Sync {
    /// Load the saved history in append order.
    fn load(&self) -> StorageResult<Vec<StrokeEvent>>;

    /// Replace the saved history.
    fn save(&self, events: &[StrokeEvent]) -> StorageResult<()>;
}
