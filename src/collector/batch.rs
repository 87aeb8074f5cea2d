use crate::source::entry::LogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    /// Unique batch ID; also the key of the batch in the buffer store
    pub batch_id: Uuid,

    pub created_at: DateTime<Utc>,

    /// Entries in source order
    pub entries: Vec<LogEntry>,

    /// Sum of the per-entry size estimates, not the serialized size
    pub size: usize,
}

impl LogBatch {
    pub fn new(entries: Vec<LogEntry>, size: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            entries,
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
