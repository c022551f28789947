//! Per-user directories

use std::path::PathBuf;

use crate::constants;

/// Root of all per-user files (`~/.layout-agent`)
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::fs::APP_DIR_NAME)
}

/// Directory holding `dify.settings.json`
pub fn config_dir() -> PathBuf {
    app_dir().join("config")
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    app_dir().join("logs")
}

/// Full path of the fallback settings file
pub fn settings_file() -> PathBuf {
    config_dir().join(constants::fs::SETTINGS_FILE_NAME)
}
