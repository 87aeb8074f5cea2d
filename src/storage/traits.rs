use crate::collector::batch::LogBatch;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable keyed queue of batches that could not be delivered.
///
/// Every batch occupies its own slot keyed by `batch_id`, so the live delivery
/// path and the replay timer may call into the store concurrently.
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Persist `batch`, replacing any stored batch with the same id.
    async fn save(&self, batch: &LogBatch) -> Result<(), StorageError>;

    /// Up to `max_count` stored batches, oldest first. Unreadable records are
    /// logged and skipped.
    async fn list(&self, max_count: usize) -> Result<Vec<LogBatch>, StorageError>;

    /// Delete the batch if present. Removing an absent id is not an error.
    async fn remove(&self, batch_id: Uuid) -> Result<(), StorageError>;

    async fn contains(&self, batch_id: Uuid) -> Result<bool, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
