pub mod batch;
pub mod batcher;
pub mod path_lock;
pub mod runner;

pub use batch::LogBatch;
pub use batcher::{estimate_entry_size, to_batches};
pub use runner::{CollectorError, CollectorRunner, FileRunReport, ReplayReport, RunnerState, StatsSnapshot};
