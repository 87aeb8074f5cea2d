use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("position record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PositionError>;

/// How far into a source file the tailer has consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePositionRecord {
    pub path: PathBuf,
    pub offset: u64,
    /// Identity of the file the offset belongs to; 0 when unknown.
    pub inode: u64,
    pub updated_at: DateTime<Utc>,
}

/// One small JSON file per source file, named by a SHA-256 of the absolute path
/// so distinct files never share a record and names survive restarts.
#[derive(Debug, Clone)]
pub struct PositionStore {
    directory: PathBuf,
}

impl PositionStore {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stable record key for a source path.
    pub fn key_for(path: &Path) -> String {
        let absolute = absolute_path(path);
        let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
        format!("{:x}", digest)
    }

    fn record_path(&self, path: &Path) -> PathBuf {
        self.directory.join(format!("{}.pos", Self::key_for(path)))
    }

    /// Load the record for `path`. Missing or unreadable records read as none;
    /// the tailer then starts the file from the beginning.
    pub async fn load(&self, path: &Path) -> Option<FilePositionRecord> {
        let record_path = self.record_path(path);

        let text = match tokio::fs::read_to_string(&record_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read position record, starting from 0"
                );
                return None;
            }
        };

        match serde_json::from_str::<FilePositionRecord>(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt position record, starting from 0"
                );
                None
            }
        }
    }

    pub async fn get_offset(&self, path: &Path) -> u64 {
        self.load(path).await.map(|r| r.offset).unwrap_or(0)
    }

    pub async fn save(&self, record: &FilePositionRecord) -> Result<()> {
        let record_path = self.record_path(&record.path);
        let temp_path = record_path.with_extension("pos.tmp");

        let json = serde_json::to_vec(record)?;
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, &record_path).await?;

        tracing::debug!(
            path = %record.path.display(),
            offset = record.offset,
            "Saved file position"
        );
        Ok(())
    }

    /// Record `offset` for `path`, tagging it with the file's current identity.
    pub async fn save_offset(&self, path: &Path, offset: u64) -> Result<()> {
        let inode = match tokio::fs::metadata(path).await {
            Ok(metadata) => file_inode(&metadata),
            Err(_) => 0,
        };

        self.save(&FilePositionRecord {
            path: path.to_path_buf(),
            offset,
            inode,
            updated_at: Utc::now(),
        })
        .await
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(unix)]
pub fn file_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
pub fn file_inode(metadata: &Metadata) -> u64 {
    // No stable file id here; creation time is the closest stand-in
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    if let Ok(created) = metadata.created() {
        created.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_record_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::open(dir.path().join("positions")).unwrap();
        assert_eq!(store.get_offset(Path::new("/var/log/a.log")).await, 0);
    }

    #[tokio::test]
    async fn test_save_and_get_offset() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        let log = dir.path().join("a.log");
        std::fs::write(&log, "hello\n").unwrap();

        store.save_offset(&log, 6).await.unwrap();
        assert_eq!(store.get_offset(&log).await, 6);

        let record = store.load(&log).await.unwrap();
        assert_eq!(record.path, log);
        assert_ne!(record.inode, 0);
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_share_records() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        store.save_offset(Path::new("/logs/a.log"), 10).await.unwrap();
        store.save_offset(Path::new("/logs/b.log"), 20).await.unwrap();

        assert_eq!(store.get_offset(Path::new("/logs/a.log")).await, 10);
        assert_eq!(store.get_offset(Path::new("/logs/b.log")).await, 20);
    }

    #[test]
    fn test_key_is_stable_and_hex() {
        let a = PositionStore::key_for(Path::new("/logs/a.log"));
        let b = PositionStore::key_for(Path::new("/logs/a.log"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, PositionStore::key_for(Path::new("/logs/b.log")));
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        let log = Path::new("/logs/c.log");
        let record_path = dir
            .path()
            .join(format!("{}.pos", PositionStore::key_for(log)));
        std::fs::write(&record_path, "not json").unwrap();

        assert_eq!(store.get_offset(log).await, 0);
    }
}
