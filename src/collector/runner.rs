use crate::collector::batcher::to_batches;
use crate::collector::path_lock::PathLocks;
use crate::config::types::CollectorConfig;
use crate::delivery::engine::DeliveryEngine;
use crate::delivery::retry::{RetryError, RetryPolicy};
use crate::delivery::sink::Sink;
use crate::source::tailer::{FileTailer, TailerError};
use crate::source::watcher::{ChangeKind, DirectoryWatcher, FileChange, WatchError};
use crate::storage::positions::{PositionError, PositionStore};
use crate::storage::traits::{BufferStore, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector is already running")]
    AlreadyRunning,

    #[error("cannot prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("tailer error: {0}")]
    Tailer(#[from] TailerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("position store error: {0}")]
    Position(#[from] PositionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Running,
}

/// Counters since the runner was created.
#[derive(Debug, Default)]
struct CollectorStats {
    files_processed: AtomicU64,
    entries_read: AtomicU64,
    batches_delivered: AtomicU64,
    batches_buffered: AtomicU64,
    batches_replayed: AtomicU64,
    pipeline_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub files_processed: u64,
    pub entries_read: u64,
    pub batches_delivered: u64,
    pub batches_buffered: u64,
    pub batches_replayed: u64,
    pub pipeline_errors: u64,
}

impl CollectorStats {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_buffered: self.batches_buffered.load(Ordering::Relaxed),
            batches_replayed: self.batches_replayed.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of one tail → batch → deliver run for a file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileRunReport {
    pub entries: usize,
    pub batches: usize,
    pub delivered: usize,
    pub buffered: usize,
    /// Never attempted because of shutdown, written to the buffer instead
    pub spilled: usize,
    /// Neither delivered nor buffered
    pub lost: usize,
}

/// Result of one pass over the buffer store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub listed: usize,
    pub replayed: usize,
    pub failed: usize,
    /// Left untouched because of shutdown
    pub skipped: usize,
}

/// Everything a pipeline run or replay pass needs, shared with spawned tasks.
struct Pipeline {
    config: Arc<CollectorConfig>,
    tailer: FileTailer,
    engine: DeliveryEngine,
    buffer: Arc<dyn BufferStore>,
    stats: CollectorStats,
}

impl Pipeline {
    async fn process_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileRunReport, CollectorError> {
        let entries = self.tailer.process(path).await?;
        self.stats.files_processed.fetch_add(1, Ordering::Relaxed);
        CollectorStats::add(&self.stats.entries_read, entries.len());

        let mut report = FileRunReport {
            entries: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let batches = to_batches(
            entries,
            self.config.max_batch_size_bytes,
            self.config.max_batch_entries,
        );
        report.batches = batches.len();

        let delivery = self.engine.deliver_all(batches, cancel).await;
        report.delivered = delivery.delivered;
        report.buffered = delivery.buffered;
        report.lost = delivery.failed;
        CollectorStats::add(&self.stats.batches_delivered, delivery.delivered);
        CollectorStats::add(&self.stats.batches_buffered, delivery.buffered);

        // The offset already moved past these entries; park them for replay.
        for batch in delivery.unsent {
            match self.buffer.save(&batch).await {
                Ok(()) => {
                    report.spilled += 1;
                    CollectorStats::add(&self.stats.batches_buffered, 1);
                }
                Err(e) => {
                    error!(
                        batch_id = %batch.batch_id,
                        error = %e,
                        "Failed to buffer batch interrupted by shutdown"
                    );
                    report.lost += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            entries = report.entries,
            batches = report.batches,
            delivered = report.delivered,
            buffered = report.buffered + report.spilled,
            "File pipeline run complete"
        );

        Ok(report)
    }

    async fn replay_buffered(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, CollectorError> {
        let batches = self
            .buffer
            .list(self.config.max_buffer_batches_per_cycle)
            .await?;

        let mut report = ReplayReport {
            listed: batches.len(),
            ..Default::default()
        };
        if batches.is_empty() {
            return Ok(report);
        }

        info!(count = batches.len(), "Replaying buffered batches");

        for batch in &batches {
            match self.engine.send_with_retry(batch, cancel).await {
                Ok(()) => {
                    if let Err(e) = self.buffer.remove(batch.batch_id).await {
                        // Delivered but still on disk: it will be sent again next cycle.
                        warn!(batch_id = %batch.batch_id, error = %e, "Failed to remove replayed batch");
                    }
                    report.replayed += 1;
                    self.stats.batches_replayed.fetch_add(1, Ordering::Relaxed);
                }
                Err(RetryError::Cancelled) => break,
                Err(RetryError::Exhausted { attempts, last }) => {
                    warn!(
                        batch_id = %batch.batch_id,
                        attempts = attempts,
                        error = %last,
                        "Replay failed, batch stays buffered"
                    );
                    report.failed += 1;
                }
            }
        }

        report.skipped = report.listed - report.replayed - report.failed;
        info!(
            replayed = report.replayed,
            failed = report.failed,
            skipped = report.skipped,
            "Buffer replay pass complete"
        );

        Ok(report)
    }
}

struct RunningTasks {
    watcher: DirectoryWatcher,
    /// Stops intake of new work
    shutdown: CancellationToken,
    /// Aborts in-flight deliveries
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    replay: JoinHandle<()>,
}

/// Wires directory changes to the tail → batch → deliver pipeline and
/// drains the buffer store on a timer.
pub struct CollectorRunner {
    pipeline: Arc<Pipeline>,
    running: Option<RunningTasks>,
}

impl CollectorRunner {
    pub fn new(
        config: Arc<CollectorConfig>,
        sink: Arc<dyn Sink>,
        buffer: Arc<dyn BufferStore>,
    ) -> Result<Self, CollectorError> {
        let positions = PositionStore::open(config.positions_directory())?;
        let tailer = FileTailer::new(config.effective_machine_id(), positions);
        let engine = DeliveryEngine::new(sink, Arc::clone(&buffer), RetryPolicy::from(&config.retry));

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                config,
                tailer,
                engine,
                buffer,
                stats: CollectorStats::default(),
            }),
            running: None,
        })
    }

    pub fn state(&self) -> RunnerState {
        if self.running.is_some() {
            RunnerState::Running
        } else {
            RunnerState::Stopped
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.pipeline.config
    }

    pub fn tailer(&self) -> &FileTailer {
        &self.pipeline.tailer
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    pub async fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }

        let config = &self.pipeline.config;
        info!(
            log_directory = %config.log_directory.display(),
            buffer_directory = %config.buffer_directory.display(),
            "Starting collector"
        );

        for dir in [config.positions_directory(), config.batches_directory()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| CollectorError::Directory {
                    path: dir.clone(),
                    source,
                })?;
        }

        let (watcher, events) = DirectoryWatcher::start(&config.log_directory, &config.file_pattern)?;
        let existing = watcher
            .matching_files()
            .map_err(|source| CollectorError::Directory {
                path: config.log_directory.clone(),
                source,
            })?;

        let shutdown = CancellationToken::new();
        let cancel = CancellationToken::new();

        if let Err(e) = self.pipeline.replay_buffered(&cancel).await {
            warn!(error = %e, "Initial buffer replay failed");
        }

        info!(existing_files = existing.len(), "Queueing catch-up scan");
        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&self.pipeline),
            events,
            existing,
            shutdown.clone(),
            cancel.clone(),
        ));
        let replay = tokio::spawn(run_replay_timer(
            Arc::clone(&self.pipeline),
            shutdown.clone(),
            cancel.clone(),
        ));

        self.running = Some(RunningTasks {
            watcher,
            shutdown,
            cancel,
            dispatcher,
            replay,
        });

        info!("Collector running");
        Ok(())
    }

    /// Stop watching, wait up to `grace` for in-flight runs, then cancel them.
    ///
    /// Cancelled runs buffer their unsent batches before this returns.
    pub async fn stop(&mut self, grace: Duration) {
        let Some(mut tasks) = self.running.take() else {
            return;
        };

        info!(grace_ms = grace.as_millis() as u64, "Stopping collector");
        tasks.watcher.stop();
        tasks.shutdown.cancel();

        let drain = futures::future::join_all([tasks.dispatcher, tasks.replay]);
        tokio::pin!(drain);
        let results = match tokio::time::timeout(grace, &mut drain).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Grace period elapsed, cancelling in-flight deliveries");
                tasks.cancel.cancel();
                drain.await
            }
        };
        tasks.cancel.cancel();

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Collector task join error");
            }
        }

        info!(stats = ?self.stats(), "Collector stopped");
    }

    /// Run the pipeline for one file now, outside the event loop.
    pub async fn process_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileRunReport, CollectorError> {
        self.pipeline.process_file(path, cancel).await
    }

    /// One pass over the buffer store: deliver up to the per-cycle limit,
    /// removing what succeeds.
    pub async fn replay_buffered(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, CollectorError> {
        self.pipeline.replay_buffered(cancel).await
    }
}

impl Drop for CollectorRunner {
    fn drop(&mut self) {
        if let Some(tasks) = &self.running {
            tasks.shutdown.cancel();
            tasks.cancel.cancel();
        }
    }
}

async fn run_dispatcher(
    pipeline: Arc<Pipeline>,
    mut events: mpsc::UnboundedReceiver<FileChange>,
    existing: Vec<PathBuf>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(pipeline.config.max_concurrent_files.max(1)));
    let locks = Arc::new(PathLocks::new());
    let mut workers: JoinSet<()> = JoinSet::new();

    let schedule = |workers: &mut JoinSet<()>, path: PathBuf| {
        let Some(slot) = locks.try_queue(&path) else {
            debug!(path = %path.display(), "Run already queued, event absorbed");
            return;
        };
        let pipeline = Arc::clone(&pipeline);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();

        workers.spawn(async move {
            let _guard = slot.begin().await;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = pipeline.process_file(&path, &cancel).await {
                pipeline.stats.pipeline_errors.fetch_add(1, Ordering::Relaxed);
                error!(path = %path.display(), error = %e, "File pipeline run failed");
            }
        });
    };

    for path in existing {
        schedule(&mut workers, path);
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(change) => match change.kind {
                    ChangeKind::Created | ChangeKind::Changed => {
                        schedule(&mut workers, change.path);
                    }
                    ChangeKind::Renamed => {
                        debug!(path = %change.path.display(), "File renamed");
                    }
                    ChangeKind::Deleted => {
                        debug!(path = %change.path.display(), "File deleted");
                        locks.forget(&change.path);
                    }
                },
                None => break,
            },
            Some(result) = workers.join_next(), if !workers.is_empty() => {
                log_worker_result(result);
            }
        }
    }

    if !workers.is_empty() {
        info!(in_flight = workers.len(), "Waiting for in-flight file runs");
    }
    while let Some(result) = workers.join_next().await {
        log_worker_result(result);
    }
}

fn log_worker_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "File run task join error");
    }
}

async fn run_replay_timer(
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(pipeline.config.upload_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // start() has just run a pass
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = pipeline.replay_buffered(&cancel).await {
                    warn!(error = %e, "Buffer replay pass failed");
                }
            }
        }
    }
}
