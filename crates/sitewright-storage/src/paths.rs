//! Path resolution for global and project storage

use std::path::PathBuf;

use crate::error::{StorageError, StorageResult};

/// Environment variable overriding the global storage directory
pub const HOME_ENV_VAR: &str = "SITEWRIGHT_HOME";

/// File name of the local settings store
pub const SETTINGS_FILE: &str = "settings.json";

/// File name of the configuration file, both globally and per project
pub const CONFIG_FILE: &str = "config.yaml";

/// Path resolver for cross-platform storage paths
pub struct PathResolver;

impl PathResolver {
    /// Resolve the global storage directory
    ///
    /// Priority:
    /// 1. `SITEWRIGHT_HOME` environment variable
    /// 2. `<config dir>/sitewright` (e.g. `~/.config/sitewright`)
    /// 3. `~/.sitewright`
    pub fn resolve_global_path() -> StorageResult<PathBuf> {
        if let Ok(home_override) = std::env::var(HOME_ENV_VAR) {
            if !home_override.trim().is_empty() {
                return Ok(PathBuf::from(home_override));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            return Ok(config_dir.join("sitewright"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            return Ok(home_dir.join(".sitewright"));
        }

        Err(StorageError::path_resolution_error(
            "Could not determine home directory",
        ))
    }

    /// Resolve the project storage directory (`./.sitewright`)
    pub fn resolve_project_path() -> PathBuf {
        PathBuf::from(".sitewright")
    }

    /// Path of the global settings file
    pub fn settings_file() -> StorageResult<PathBuf> {
        Ok(Self::resolve_global_path()?.join(SETTINGS_FILE))
    }

    /// Path of the global configuration file
    pub fn global_config_file() -> StorageResult<PathBuf> {
        Ok(Self::resolve_global_path()?.join(CONFIG_FILE))
    }

    /// Path of the project configuration file
    pub fn project_config_file() -> PathBuf {
        Self::resolve_project_path().join(CONFIG_FILE)
    }
}
