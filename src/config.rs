//! Explorer configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::FilterGroup;
use crate::source::LogSourceTable;
use crate::time_range::HelperRange;

pub const DEFAULT_CONFIG_FILE: &str = "explorer.json";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4000/api/logs";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings for one explorer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// SQL-over-HTTP log query endpoint.
    pub endpoint: String,
    pub project: String,
    pub api_key: Option<String>,
    /// Source selected at startup.
    pub source: LogSourceTable,
    /// Preset window selected at startup.
    pub helper: HelperRange,
    /// Seconds between background polls for new rows; `0` disables polling.
    pub poll_interval_secs: u64,
    /// Filters applied on top of whatever the operator selects.
    pub filter_override: FilterGroup,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project: "default".to_string(),
            api_key: None,
            source: LogSourceTable::default(),
            helper: HelperRange::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            filter_override: FilterGroup::new(),
        }
    }
}

impl ExplorerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, falling back to defaults when it is missing. A file that
    /// exists but cannot be read or parsed is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::from_json_file(&path) {
            Ok(config) => {
                tracing::info!(path = %path.as_ref().display(), "Loaded explorer config");
                Ok(config)
            }
            Err(ConfigError::NotFound(path)) => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }
}
