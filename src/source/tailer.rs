use crate::source::entry::LogEntry;
use crate::storage::positions::{file_inode, FilePositionRecord, PositionError, PositionStore};
use chrono::Utc;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const LOGGED_LINE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum TailerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("position error: {0}")]
    Position(#[from] PositionError),

    #[error("read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A line read from the file together with the offset it started at.
#[derive(Debug)]
struct RawLine {
    bytes: Vec<u8>,
    start_offset: u64,
}

#[derive(Debug)]
struct ReadPass {
    lines: Vec<RawLine>,
    start_offset: u64,
    end_offset: u64,
    inode: u64,
}

/// Reads newly appended JSON lines from source files, resuming from the
/// offset persisted for each file.
pub struct FileTailer {
    machine_id: String,
    positions: PositionStore,
}

impl FileTailer {
    pub fn new(machine_id: impl Into<String>, positions: PositionStore) -> Self {
        Self {
            machine_id: machine_id.into(),
            positions,
        }
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub async fn get_offset(&self, path: &Path) -> u64 {
        self.positions.get_offset(path).await
    }

    pub async fn save_offset(&self, path: &Path, offset: u64) -> Result<(), TailerError> {
        self.positions.save_offset(path, offset).await?;
        Ok(())
    }

    /// Parse the complete lines appended to `path` since the last pass.
    ///
    /// Blank lines are skipped; malformed or invalid lines are logged and skipped.
    /// The offset is persisted after every pass, even when nothing was produced.
    pub async fn process(&self, path: &Path) -> Result<Vec<LogEntry>, TailerError> {
        tracing::debug!(path = %path.display(), "Processing log file");

        let record = self.positions.load(path).await;

        let owned_path = path.to_path_buf();
        let pass = match tokio::task::spawn_blocking(move || read_new_lines(&owned_path, record))
            .await?
        {
            Ok(pass) => pass,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Log file does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut entries = Vec::with_capacity(pass.lines.len());
        for line in &pass.lines {
            if let Some(entry) = self.parse_line(path, line, now) {
                entries.push(entry);
            }
        }

        self.positions
            .save(&FilePositionRecord {
                path: path.to_path_buf(),
                offset: pass.end_offset,
                inode: pass.inode,
                updated_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            path = %path.display(),
            from_offset = pass.start_offset,
            to_offset = pass.end_offset,
            lines = pass.lines.len(),
            entries = entries.len(),
            "Processed log file"
        );

        Ok(entries)
    }

    fn parse_line(
        &self,
        path: &Path,
        line: &RawLine,
        now: chrono::DateTime<Utc>,
    ) -> Option<LogEntry> {
        let text = match std::str::from_utf8(&line.bytes) {
            Ok(text) => text.trim(),
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    offset = line.start_offset,
                    "Skipping line that is not valid UTF-8"
                );
                return None;
            }
        };

        if text.is_empty() {
            return None;
        }

        let mut entry: LogEntry = match serde_json::from_str(text) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    offset = line.start_offset,
                    error = %e,
                    line = %truncate(text, LOGGED_LINE_LIMIT),
                    "Skipping malformed log line"
                );
                return None;
            }
        };

        if entry.machine_id.trim().is_empty() {
            entry.machine_id = self.machine_id.clone();
        }

        if let Err(e) = entry.validate(now) {
            tracing::warn!(
                path = %path.display(),
                offset = line.start_offset,
                errors = %e,
                "Skipping invalid log entry"
            );
            return None;
        }

        Some(entry)
    }
}

/// Where to resume reading a file of `length` bytes identified by `inode`.
///
/// A replaced file (different inode) or one that shrank below the recorded
/// offset is read again from the start.
fn resume_offset(record: Option<&FilePositionRecord>, inode: u64, length: u64) -> u64 {
    match record {
        None => 0,
        Some(r) if r.inode != 0 && inode != 0 && r.inode != inode => 0,
        Some(r) if r.offset > length => 0,
        Some(r) => r.offset,
    }
}

fn read_new_lines(path: &Path, record: Option<FilePositionRecord>) -> std::io::Result<ReadPass> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    let inode = file_inode(&metadata);
    let length = metadata.len();

    let start_offset = resume_offset(record.as_ref(), inode, length);
    if let Some(r) = &record {
        if start_offset == 0 && r.offset > 0 {
            tracing::info!(
                path = %path.display(),
                recorded_offset = r.offset,
                length,
                "File was truncated or replaced, reading from the start"
            );
        }
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start_offset))?;

    let mut lines = Vec::new();
    let mut offset = start_offset;
    loop {
        let mut buf = Vec::new();
        let bytes_read = reader.read_until(b'\n', &mut buf)?;
        if bytes_read == 0 {
            break;
        }

        // The writer has not finished this line yet; leave it for the next pass.
        if buf.last() != Some(&b'\n') {
            break;
        }

        let line_start = offset;
        offset += bytes_read as u64;

        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        if line_start == 0 && buf.starts_with(UTF8_BOM) {
            buf.drain(..UTF8_BOM.len());
        }

        lines.push(RawLine {
            bytes: buf,
            start_offset: line_start,
        });
    }

    Ok(ReadPass {
        lines,
        start_offset,
        end_offset: offset,
        inode,
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
