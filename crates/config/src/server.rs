//! Server settings.
//!
//! ```toml
//! bind = "127.0.0.1:7878"
//! log_level = "info"
//! max_line_bytes = 1048576
//! max_parse_failures = 3
//! max_connections = 64
//!
//! [store]
//! backend = "sqlite"
//! path = "/var/lib/cellgraph/cells.db"
//! ```
//!
//! Every key is optional; missing keys take their default.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("invalid config {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the JSONL listener binds to.
    pub bind: String,
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,
    /// Longest accepted request line; longer lines close the connection.
    pub max_line_bytes: usize,
    /// Consecutive malformed lines tolerated before a connection is closed.
    pub max_parse_failures: u32,
    /// Connections beyond this are refused.
    pub max_connections: usize,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
            log_level: "info".to_string(),
            max_line_bytes: 1024 * 1024,
            max_parse_failures: 3,
            max_connections: 64,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file; only read when `backend = "sqlite"`.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

/// `<data dir>/cellgraph/cells.db`
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cellgraph")
        .join("cells.db")
}

impl ServerConfig {
    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellgraph")
            .join("server.toml")
    }

    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists, else defaults.
    ///
    /// An explicitly given path must exist; the default file is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
