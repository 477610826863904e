// Mirror configuration: `~/.treesync/mirror.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use treesync_common::sort::SortPolicy;

use crate::client::default_socket_path;

/// Path to the mirror config file: `~/.treesync/mirror.toml`.
pub fn mirror_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".treesync").join("mirror.toml"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Daemon socket override (defaults to `~/.treesync/daemon.sock`).
    pub socket_path: Option<PathBuf>,
    pub sort: SortPolicy,
}

impl MirrorConfig {
    /// Load from `~/.treesync/mirror.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        mirror_config_path().and_then(|path| Self::load_from(&path).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
