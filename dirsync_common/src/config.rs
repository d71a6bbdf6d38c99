use crate::{AppConfig, SyncError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "dirsync.toml";

/// Load the configuration from the platform config directory, falling back
/// to defaults when no file exists yet.
pub fn load_config() -> Result<AppConfig, SyncError> {
    load_config_from(&config_path()?)
}

/// Load the configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<AppConfig, SyncError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let data = fs::read_to_string(path)?;
    toml::from_str(&data).map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Write the configuration, creating parent directories as needed.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data =
        toml::to_string_pretty(config).map_err(|e| SyncError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

/// Platform config file location.
pub fn config_path() -> Result<PathBuf, SyncError> {
    let dirs = ProjectDirs::from("", "dirsync", "dirsync")
        .ok_or_else(|| SyncError::Config("Unable to determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Platform cache directory, used for the persisted comparator cache when
/// `AppConfig.cache_dir` is unset.
pub fn default_cache_dir() -> Result<PathBuf, SyncError> {
    let dirs = ProjectDirs::from("", "dirsync", "dirsync")
        .ok_or_else(|| SyncError::Config("Unable to determine cache directory".to_string()))?;
    Ok(dirs.cache_dir().to_path_buf())
}
