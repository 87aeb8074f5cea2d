use super::traits::{BufferStore, StorageError};
use crate::collector::batch::LogBatch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Non-durable buffer store, for tests and for running without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryBufferStore {
    batches: Mutex<HashMap<Uuid, LogBatch>>,
}

impl MemoryBufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn batches(&self) -> MutexGuard<'_, HashMap<Uuid, LogBatch>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.batches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BufferStore for MemoryBufferStore {
    async fn save(&self, batch: &LogBatch) -> Result<(), StorageError> {
        self.batches().insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn list(&self, max_count: usize) -> Result<Vec<LogBatch>, StorageError> {
        let mut listed: Vec<LogBatch> = self.batches().values().cloned().collect();
        listed.sort_by_key(|b| (b.created_at, b.batch_id));
        listed.truncate(max_count);
        Ok(listed)
    }

    async fn remove(&self, batch_id: Uuid) -> Result<(), StorageError> {
        self.batches().remove(&batch_id);
        Ok(())
    }

    async fn contains(&self, batch_id: Uuid) -> Result<bool, StorageError> {
        Ok(self.batches().contains_key(&batch_id))
    }
}
