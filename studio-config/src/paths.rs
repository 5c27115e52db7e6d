use crate::error::{ConfigError, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "STUDIO_CLI_CONFIG";

/// Directory under the user's home holding the configuration.
pub const CONFIG_DIR_NAME: &str = ".studio_cli";

pub const CONFIG_FILE_NAME: &str = "config";

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. `STUDIO_CLI_CONFIG` environment variable
/// 2. `~/.studio_cli/config`
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoHomeDir)
}
