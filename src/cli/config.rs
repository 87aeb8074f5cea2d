use crate::config::generate::generate_starter_config;
use crate::config::{default_config_locations, SYSTEM_CONFIG_PATH};
use crate::config::parse::load_config;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    write_config(&generate_starter_config(), stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // First default location whose directory can be created, else the system path
    let config_path = default_config_locations()
        .into_iter()
        .find(|candidate| {
            let Some(parent) = candidate.parent() else {
                return false;
            };
            match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    false
                }
            }
        })
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));

    if config_path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());
    let config = load_config(&path)?;

    println!("Config is valid.");
    println!("  machine id:      {}", config.collector.machine_id);
    println!("  log directory:   {}", config.collector.log_directory.display());
    println!("  file pattern:    {}", config.collector.file_pattern);
    println!("  buffer:          {}", config.collector.buffer_directory.display());
    println!("  sink:            {}", config.sink.url);
    println!(
        "  batches:         <= {} entries, <= {} bytes",
        config.collector.max_batch_entries, config.collector.max_batch_size_bytes
    );
    println!(
        "  retry:           {} retries from {:?}",
        config.collector.retry.count, config.collector.retry.interval
    );
    Ok(())
}
