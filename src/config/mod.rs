pub mod generate;
pub mod parse;
pub mod types;

use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{CollectorConfig, Config, HousekeepingConfig, RetryConfig, SinkConfig};

const USER_CONFIG_PATH: &str = ".config/logship/config.yml";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/logship/config.yml";

/// Replace a leading `~` component with the home directory.
/// `~user/...` forms are left alone.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) if rest.as_os_str().is_empty() => home,
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Where the agent looks for its config when `--config` is not given, in order.
pub fn default_config_locations() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(USER_CONFIG_PATH))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)))
        .collect()
}

/// An explicit path always wins; otherwise the first default location that exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(expand_tilde(path)),
        None => default_config_locations().into_iter().find(|p| p.exists()),
    }
}
