//! Client configuration, loaded from RON.
//!
//! ```ron
//! (
//!     cache_dir: Some("/var/tmp/usersync"),
//!     event_capacity: 128,
//!     log_filter: "usersync_client=debug",
//! )
//! ```
//!
//! Every field is optional. A missing config file means defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_EVENT_CAPACITY, DEFAULT_LOG_FILTER};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the file-backed cache lives. `None` → platform cache dir.
    pub cache_dir: Option<PathBuf>,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ClientConfig {
    /// `$XDG_CONFIG_HOME/usersync/client.ron` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load from [`ClientConfig::default_path`], or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// The cache directory to use, falling back to the platform cache dir
    /// and finally to `./.usersync`.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR_NAME}")))
    }
}
