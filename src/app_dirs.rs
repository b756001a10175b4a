//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/medalert/` | `~/.local/share/medalert/` |
//! | Config | `~/Library/Application Support/medalert/` | `~/.config/medalert/` |
//!
//! # Environment Overrides
//!
//! - `MEDALERT_DATA_DIR` overrides [`data_dir`]
//! - `MEDALERT_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds schedules, dosage history, notification records and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MEDALERT_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("medalert"))
        .unwrap_or_else(|| PathBuf::from("/tmp/medalert-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MEDALERT_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("medalert"))
        .unwrap_or_else(|| PathBuf::from("/tmp/medalert-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
