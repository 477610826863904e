// Local configuration files for the daemon.
//
// Daemon config: `~/.treesync/daemon.toml`
// Directory settings: `<dir>/.treesync-dir.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use treesync_common::sort::SortKind;

use crate::history::DEFAULT_HISTORY_CAPACITY;

/// Per-directory settings file name.
pub const DIR_SETTINGS_FILE: &str = ".treesync-dir.toml";

/// Root directory for treesync state: `~/.treesync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".treesync"))
}

/// Path to the daemon config file: `~/.treesync/daemon.toml`.
pub fn daemon_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("daemon.toml"))
}

// ── Daemon config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Roots opened at startup.
    pub roots: Vec<PathBuf>,
    /// Number of trailing changes kept per root.
    pub history_capacity: usize,
    /// Watcher debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Socket override (defaults to `~/.treesync/daemon.sock`).
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            debounce_ms: 100,
            socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// Load from `~/.treesync/daemon.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        daemon_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

// ── Directory settings ─────────────────────────────────────────────

/// Persisted per-directory display settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DirectorySettings {
    pub sort: SortKind,
}

impl DirectorySettings {
    /// Settings for `dir`. Missing files yield defaults; unreadable ones are
    /// logged and also yield defaults.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(DIR_SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "ignoring malformed directory settings");
                Self::default()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read directory settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(DIR_SETTINGS_FILE), contents)?;
        Ok(())
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
