use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::database::Dialect;
use crate::error::{ConfigError, Error, Result};
use crate::logging::LogFormat;

/// Database configuration: connection target plus schema synchronization flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQL dialect spoken by the driver
    pub dialect: Dialect,

    /// Connection URL handed to the driver
    pub url: String,

    /// Connection pool settings
    pub pool: PoolConfig,

    /// Drop and recreate every table during synchronization
    pub force_sync: bool,

    /// Alter existing tables to match the schema during synchronization
    pub alter_sync: bool,

    /// Run the migrations hook before synchronization (ignored with `force_sync`)
    pub run_migrations: bool,

    /// Insert the schema seeds after synchronization
    pub run_seeds: bool,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        // Default to SQLite in-memory database
        Self {
            dialect: Dialect::Sqlite,
            url: "sqlite::memory:".to_string(),
            pool: PoolConfig::default(),
            force_sync: false,
            alter_sync: false,
            run_migrations: false,
            run_seeds: false,
            log_format: LogFormat::default(),
        }
    }
}

impl DatabaseConfig {
    /// Load a configuration file; the format follows the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        load_file(path.as_ref())
    }

    /// Override file settings with `BITS_SQL_URL` and `BITS_SQL_FORCE_SYNC`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("BITS_SQL_URL") {
            self.url = url;
        }
        if let Ok(raw) = std::env::var("BITS_SQL_FORCE_SYNC") {
            self.force_sync = parse_flag(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!("BITS_SQL_FORCE_SYNC must be a boolean, got {raw:?}"))
            })?;
        }
        Ok(())
    }
}

/// Configuration for connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection idle timeout
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Connection max lifetime
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_seconds: u64,

    /// Connection acquisition timeout
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_idle_timeout() -> u64 {
    300
} // 5 minutes
fn default_max_lifetime() -> u64 {
    1800
} // 30 minutes
fn default_acquire_timeout() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            idle_timeout_seconds: default_idle_timeout(),
            max_lifetime_seconds: default_max_lifetime(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Deserialize a TOML, YAML or JSON file depending on its extension.
pub(crate) fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    let display = path.display().to_string();
    let parse_error = |message: String| {
        Error::Config(ConfigError::Parse {
            path: display.clone(),
            message,
        })
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&contents).map_err(|e| parse_error(e.to_string())),
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string()))
        }
        Some("json") => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string())),
        other => Err(Error::Config(ConfigError::Invalid(format!(
            "unsupported file extension {:?} for {}",
            other.unwrap_or(""),
            display
        )))),
    }
}
