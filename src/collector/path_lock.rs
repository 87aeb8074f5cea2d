use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::MutexGuard;

/// Per-path slot: a lock held while the path is being processed, and a flag
/// marking that a run is already waiting for it.
#[derive(Debug, Default)]
pub struct PathSlot {
    lock: tokio::sync::Mutex<()>,
    queued: AtomicBool,
}

impl PathSlot {
    /// Wait for exclusive access to the path.
    ///
    /// Clears the queued flag once acquired, so changes arriving while this
    /// run is in progress schedule another run.
    pub async fn begin(&self) -> MutexGuard<'_, ()> {
        let guard = self.lock.lock().await;
        self.queued.store(false, Ordering::SeqCst);
        guard
    }

    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Keyed locks serializing pipeline runs for the same file.
#[derive(Debug, Default)]
pub struct PathLocks {
    slots: Mutex<HashMap<PathBuf, Arc<PathSlot>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, path: &Path) -> Arc<PathSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }

    /// Mark a run as queued for `path`.
    ///
    /// Returns `None` when a run is already queued and has not started yet;
    /// that run will see whatever triggered this call.
    pub fn try_queue(&self, path: &Path) -> Option<Arc<PathSlot>> {
        let slot = self.slot(path);
        if slot.queued.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(slot)
        }
    }

    /// Drop the slot for a deleted file, unless a run still holds or awaits it.
    pub fn forget(&self, path: &Path) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(path) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
