//! Path constants for configuration, downloads and logs.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "jukebox-led";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable that overrides the config file location
pub const CONFIG_ENV_VAR: &str = "JUKEBOX_CONFIG";

/// The name of the downloaded audio directory
pub const DOWNLOAD_DIR_NAME: &str = "downloads";

/// The name of the log file
pub const LOG_FILE_NAME: &str = "jukebox.log";

/// Get the configuration directory path (~/.config/jukebox-led/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path, honouring `JUKEBOX_CONFIG` when set
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join(CONFIG_FILE_NAME))
}

/// Get the cache directory path (~/.cache/jukebox-led/)
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join(CONFIG_DIR_NAME)
}

/// Default location for downloaded audio (`~/.cache/jukebox-led/downloads`)
#[must_use]
pub fn default_download_dir() -> PathBuf {
    cache_dir().join(DOWNLOAD_DIR_NAME)
}

/// Get the log file path (`~/.cache/jukebox-led/jukebox.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    cache_dir().join(LOG_FILE_NAME)
}
