use super::types::*;
use crate::config::expand_tilde;
use crate::source::entry::MAX_MACHINE_ID_LENGTH;
use crate::source::watcher::FilePattern;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok(config)
}

/// Parse, normalize and validate config text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    apply_machine_id_default(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Substitute every `$env{NAME}` reference, failing with the full list of
/// variables that are not set.
fn expand_env_vars(yaml: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;

    let mut unset = BTreeSet::new();
    let expanded = re.replace_all(yaml, |caps: &Captures| match std::env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            unset.insert(caps[1].to_string());
            String::new()
        }
    });

    if unset.is_empty() {
        return Ok(expanded.into_owned());
    }

    let names: Vec<String> = unset.into_iter().collect();
    Err(ConfigError::Validation(format!(
        "environment variables not set: {}. Export them or replace the $env{{...}} references with values",
        names.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    config.collector.log_directory = expand_tilde(&config.collector.log_directory);
    config.collector.buffer_directory = expand_tilde(&config.collector.buffer_directory);
}

fn apply_machine_id_default(config: &mut Config) {
    config.collector.machine_id = config.collector.effective_machine_id();
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_collector(&config.collector, &mut errors);
    validate_sink(&config.sink, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_collector(collector: &CollectorConfig, errors: &mut Vec<String>) {
    if collector.log_directory.as_os_str().is_empty() {
        errors.push("collector.log_directory cannot be empty".to_string());
    }

    if collector.buffer_directory.as_os_str().is_empty() {
        errors.push("collector.buffer_directory cannot be empty".to_string());
    }

    if let Err(e) = FilePattern::new(&collector.file_pattern) {
        errors.push(format!("collector.file_pattern: {}", e));
    }

    if collector.machine_id.chars().count() > MAX_MACHINE_ID_LENGTH {
        errors.push(format!(
            "collector.machine_id must be at most {} characters",
            MAX_MACHINE_ID_LENGTH
        ));
    }

    if collector.max_batch_size_bytes == 0 {
        errors.push("collector.max_batch_size_bytes must be greater than 0".to_string());
    }

    if collector.max_batch_entries == 0 {
        errors.push("collector.max_batch_entries must be greater than 0".to_string());
    }

    if collector.max_buffer_batches_per_cycle == 0 {
        errors.push("collector.max_buffer_batches_per_cycle must be greater than 0".to_string());
    }

    if collector.max_concurrent_files == 0 {
        errors.push("collector.max_concurrent_files must be greater than 0".to_string());
    }

    if collector.upload_interval.is_zero() {
        errors.push("collector.upload_interval must be greater than 0".to_string());
    }
}

fn validate_sink(sink: &SinkConfig, errors: &mut Vec<String>) {
    if sink.url.is_empty() {
        errors.push("sink.url cannot be empty".to_string());
    } else if !(sink.url.starts_with("http://") || sink.url.starts_with("https://")) {
        errors.push(format!("sink.url must be an http(s) URL: {}", sink.url));
    }

    if sink.timeout.is_zero() {
        errors.push("sink.timeout must be greater than 0".to_string());
    }
}
