use crate::collector::runner::{CollectorError, CollectorRunner};
use crate::config::default_config_locations;
use crate::config::parse::load_config;
use crate::delivery::sink::{HttpSink, SinkError};
use crate::storage::buffer::FileBufferStore;
use crate::storage::traits::StorageError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("buffer store error: {0}")]
    Storage(#[from] StorageError),

    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("failed to listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            for location in default_config_locations() {
                eprintln!("  {}", location.display());
            }
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_agent(&config_path).await.map_err(|e| e.into())
}

async fn run_agent(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let collector = Arc::new(config.collector);
    info!(
        machine_id = %collector.machine_id,
        sink = %config.sink.url,
        "Configuration loaded"
    );

    let sink = Arc::new(HttpSink::new(&config.sink)?);
    let buffer = Arc::new(FileBufferStore::open(collector.batches_directory())?);

    let mut runner = CollectorRunner::new(Arc::clone(&collector), sink, buffer)?;
    runner.start().await?;

    info!("Press Ctrl+C to stop");
    signal::ctrl_c().await.map_err(RunError::Signal)?;
    info!("Shutdown signal received");

    runner.stop(collector.shutdown_grace).await;
    Ok(())
}
