pub mod entry;
pub mod tailer;
pub mod watcher;

pub use entry::{EntryValidationError, LogEntry, Severity};
pub use tailer::{FileTailer, TailerError};
pub use watcher::{ChangeKind, DirectoryWatcher, FileChange, FilePattern, WatchError};
