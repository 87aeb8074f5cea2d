use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("invalid file pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Changed,
    Renamed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// File name glob: `*` matches any run of characters, `?` a single one.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self, WatchError> {
        if glob.is_empty() {
            return Err(WatchError::Pattern {
                pattern: glob.to_string(),
                reason: "pattern cannot be empty".to_string(),
            });
        }
        if glob.contains('/') || glob.contains('\\') {
            return Err(WatchError::Pattern {
                pattern: glob.to_string(),
                reason: "pattern matches file names and cannot contain a path separator"
                    .to_string(),
            });
        }

        let mut re = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| WatchError::Pattern {
            pattern: glob.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.matches_name(n))
    }
}

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<FileChange>>>>;

/// Watches one directory (non-recursively) for changes to files matching a pattern.
///
/// Events are forwarded from the notification thread onto an unbounded channel.
/// Once `stop` returns no further events are sent.
pub struct DirectoryWatcher {
    directory: PathBuf,
    pattern: FilePattern,
    watcher: Option<RecommendedWatcher>,
    sender: SharedSender,
}

impl DirectoryWatcher {
    /// Create `directory` if needed and begin watching it.
    pub fn start(
        directory: &Path,
        pattern: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FileChange>), WatchError> {
        let pattern = FilePattern::new(pattern)?;

        if !directory.exists() {
            tracing::info!(
                directory = %directory.display(),
                "Watched directory does not exist, creating it"
            );
        }
        std::fs::create_dir_all(directory)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let handler_sender = Arc::clone(&sender);
        let handler_pattern = pattern.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => forward_event(&event, &handler_pattern, &handler_sender),
                Err(e) => tracing::warn!(error = %e, "File watch error"),
            }
        })?;
        watcher.watch(directory, RecursiveMode::NonRecursive)?;

        tracing::info!(
            directory = %directory.display(),
            pattern = %pattern.as_str(),
            "Started watching directory"
        );

        Ok((
            Self {
                directory: directory.to_path_buf(),
                pattern,
                watcher: Some(watcher),
                sender,
            },
            rx,
        ))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn pattern(&self) -> &FilePattern {
        &self.pattern
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Files currently in the directory that match the pattern, sorted by name.
    pub fn matching_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && self.pattern.matches(&entry.path()) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn stop(&mut self) {
        // Close the channel first so a callback already in flight cannot send.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.directory) {
                tracing::debug!(error = %e, "Unwatch failed, dropping watcher");
            }
            tracing::info!(directory = %self.directory.display(), "Stopped watching directory");
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_event(event: &Event, pattern: &FilePattern, sender: &SharedSender) {
    let Some((kind, paths)) = classify(event) else {
        return;
    };

    let guard = match sender.lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    let Some(tx) = guard.as_ref() else {
        return;
    };

    for path in paths {
        if !pattern.matches(path) {
            continue;
        }
        tracing::debug!(path = %path.display(), kind = ?kind, "File change detected");
        // Receiver gone means the agent is shutting down
        let _ = tx.send(FileChange {
            path: path.clone(),
            kind,
        });
    }
}

/// Map a notification onto a change kind and the paths it concerns.
fn classify(event: &Event) -> Option<(ChangeKind, &[PathBuf])> {
    let paths = event.paths.as_slice();
    match &event.kind {
        EventKind::Create(_) => Some((ChangeKind::Created, paths)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // [from, to]: report the new name only
            let to = paths.len().saturating_sub(1);
            Some((ChangeKind::Renamed, &paths[to..]))
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some((ChangeKind::Renamed, paths)),
        EventKind::Modify(_) => Some((ChangeKind::Changed, paths)),
        EventKind::Remove(_) => Some((ChangeKind::Deleted, paths)),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = FilePattern::new("*.log").unwrap();
        assert!(pattern.matches(Path::new("/logs/machine.log")));
        assert!(pattern.matches(Path::new("/logs/.log")));
        assert!(!pattern.matches(Path::new("/logs/machine.log.1")));
        assert!(!pattern.matches(Path::new("/logs/machine.txt")));

        let pattern = FilePattern::new("app-??.json").unwrap();
        assert!(pattern.matches_name("app-01.json"));
        assert!(!pattern.matches_name("app-1.json"));
    }

    #[test]
    fn test_pattern_escapes_regex_metacharacters() {
        let pattern = FilePattern::new("a+b(1).log").unwrap();
        assert!(pattern.matches_name("a+b(1).log"));
        assert!(!pattern.matches_name("aab1.log"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(FilePattern::new("").is_err());
        assert!(FilePattern::new("logs/*.log").is_err());
    }

    #[test]
    fn test_classify_event_kinds() {
        let created = event(EventKind::Create(CreateKind::File), &["/l/a.log"]);
        assert_eq!(classify(&created).unwrap().0, ChangeKind::Created);

        let changed = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/l/a.log"],
        );
        assert_eq!(classify(&changed).unwrap().0, ChangeKind::Changed);

        let removed = event(EventKind::Remove(RemoveKind::File), &["/l/a.log"]);
        assert_eq!(classify(&removed).unwrap().0, ChangeKind::Deleted);

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/l/a.log", "/l/b.log"],
        );
        let (kind, paths) = classify(&renamed).unwrap();
        assert_eq!(kind, ChangeKind::Renamed);
        assert_eq!(paths, &[PathBuf::from("/l/b.log")]);

        let access = event(EventKind::Access(notify::event::AccessKind::Any), &["/l/a.log"]);
        assert!(classify(&access).is_none());
    }

    #[test]
    fn test_forward_filters_by_pattern_and_stops() {
        let pattern = FilePattern::new("*.log").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let ev = event(
            EventKind::Create(CreateKind::File),
            &["/l/a.log", "/l/notes.txt"],
        );
        forward_event(&ev, &pattern, &sender);
        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/l/a.log"));
        assert!(rx.try_recv().is_err());

        sender.lock().unwrap().take();
        forward_event(&ev, &pattern, &sender);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_creates_directory_and_reports_writes() {
        let dir = TempDir::new().unwrap();
        let watched = dir.path().join("incoming");

        let (mut watcher, mut rx) = DirectoryWatcher::start(&watched, "*.log").unwrap();
        assert!(watched.is_dir());

        std::fs::write(watched.join("ignored.txt"), "x\n").unwrap();
        std::fs::write(watched.join("machine.log"), "x\n").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event")
            .unwrap();
        assert_eq!(change.path.file_name().unwrap(), "machine.log");
        assert!(matches!(
            change.kind,
            ChangeKind::Created | ChangeKind::Changed
        ));

        assert_eq!(watcher.matching_files().unwrap(), vec![watched.join("machine.log")]);

        watcher.stop();
        assert!(!watcher.is_running());
        // Channel closes once the sender is dropped
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {}
        assert!(rx.recv().await.is_none());
    }
}
