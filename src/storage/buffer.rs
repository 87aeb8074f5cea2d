use super::traits::{BufferStore, StorageError};
use crate::collector::batch::LogBatch;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const BATCH_EXTENSION: &str = "json";

/// Buffer store keeping one `<batch_id>.json` file per batch.
///
/// Files are written to a temporary name and renamed into place, so `list`
/// never observes a half-written batch.
#[derive(Debug, Clone)]
pub struct FileBufferStore {
    directory: PathBuf,
}

impl FileBufferStore {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn batch_path(&self, batch_id: Uuid) -> PathBuf {
        self.directory
            .join(format!("{}.{}", batch_id, BATCH_EXTENSION))
    }

    async fn read_batch(path: &Path) -> Result<LogBatch, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl BufferStore for FileBufferStore {
    async fn save(&self, batch: &LogBatch) -> Result<(), StorageError> {
        let path = self.batch_path(batch.batch_id);
        let temp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec(batch)?;
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, &path).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            entries = batch.len(),
            "Batch saved to buffer"
        );
        Ok(())
    }

    async fn list(&self, max_count: usize) -> Result<Vec<LogBatch>, StorageError> {
        let mut batches = Vec::new();

        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BATCH_EXTENSION) {
                continue;
            }
            match Self::read_batch(&path).await {
                Ok(batch) => batches.push(batch),
                // Removed by a concurrent delivery since read_dir
                Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable buffered batch"
                    );
                }
            }
        }

        // Creation time decides both order and which batches make the cut;
        // file times change when a batch is re-saved.
        batches.sort_by_key(|b| (b.created_at, b.batch_id));
        batches.truncate(max_count);
        Ok(batches)
    }

    async fn remove(&self, batch_id: Uuid) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.batch_path(batch_id)).await {
            Ok(()) => {
                tracing::info!(batch_id = %batch_id, "Batch removed from buffer");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(batch_id = %batch_id, "Batch already absent from buffer");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, batch_id: Uuid) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.batch_path(batch_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::entry::{LogEntry, Severity};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn make_batch(message: &str) -> LogBatch {
        let entry = LogEntry {
            time_generated: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            machine_id: "press-01".to_string(),
            severity: Severity::Information,
            event_id: 1,
            message: message.to_string(),
            operation_id: None,
            tags: BTreeMap::new(),
        };
        LogBatch::new(vec![entry], 40)
    }

    #[tokio::test]
    async fn test_save_list_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path().join("batches")).unwrap();

        let batch = make_batch("first");
        store.save(&batch).await.unwrap();
        assert!(store.contains(batch.batch_id).await.unwrap());

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed, vec![batch.clone()]);

        store.remove(batch.batch_id).await.unwrap();
        assert!(!store.contains(batch.batch_id).await.unwrap());
        assert!(store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_twice_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let batch = make_batch("x");
        store.save(&batch).await.unwrap();
        store.remove(batch.batch_id).await.unwrap();
        store.remove(batch.batch_id).await.unwrap();
        store.remove(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_overwrites_same_id() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let mut batch = make_batch("before");
        store.save(&batch).await.unwrap();
        batch.entries[0].message = "after".to_string();
        store.save(&batch).await.unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].entries[0].message, "after");
    }

    #[tokio::test]
    async fn test_list_is_oldest_first_and_bounded() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let base = Utc::now() - Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut batch = make_batch(&format!("batch {}", i));
            batch.created_at = base + Duration::seconds(i);
            store.save(&batch).await.unwrap();
            ids.push(batch.batch_id);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let listed = store.list(10).await.unwrap();
        let listed_ids: Vec<_> = listed.iter().map(|b| b.batch_id).collect();
        assert_eq!(listed_ids, ids);

        let first_two = store.list(2).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].batch_id, ids[0]);
    }

    #[tokio::test]
    async fn test_list_orders_by_creation_not_save_order() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let newer = make_batch("newer");
        store.save(&newer).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut older = make_batch("older");
        older.created_at = newer.created_at - Duration::minutes(5);
        store.save(&older).await.unwrap();

        let first = store.list(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].batch_id, older.batch_id);

        // Re-saving the older batch touches its file but not its place in line
        store.save(&older).await.unwrap();
        let all: Vec<_> = store.list(10).await.unwrap().iter().map(|b| b.batch_id).collect();
        assert_eq!(all, vec![older.batch_id, newer.batch_id]);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let batch = make_batch("good");
        store.save(&batch).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), "{broken").unwrap();
        std::fs::write(dir.path().join("leftover.json.tmp"), "partial").unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].batch_id, batch.batch_id);
    }

    #[tokio::test]
    async fn test_record_uses_wire_field_names() {
        let dir = TempDir::new().unwrap();
        let store = FileBufferStore::open(dir.path()).unwrap();

        let batch = make_batch("shape");
        store.save(&batch).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", batch.batch_id))).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["batchId"], batch.batch_id.to_string());
        assert!(json["createdAt"].is_string());
        assert_eq!(json["size"], 40);
        assert_eq!(json["entries"][0]["Message"], "shape");
    }
}
