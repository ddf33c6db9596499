//! Runtime configuration for opening a record store.
//!
//! # Responsibility
//! - Parse a JSON config file into `StoreConfig`.
//! - Open the configured store and start logging from it.
//!
//! # Invariants
//! - Missing fields fall back to defaults; unknown fields are rejected.
//! - `db_path: null` selects a private in-memory database.

use crate::db::{DbError, DEFAULT_BUSY_TIMEOUT};
use crate::logging::{init_logging, LogLevel};
use crate::store::sqlite::SqliteRecordStore;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Db(DbError),
    Logging(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid config `{}`: {source}", path.display())
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::Logging(_) => None,
        }
    }
}

impl From<DbError> for ConfigError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub db_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: LogLevel::for_build(),
            log_dir: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Opens the configured database, or an in-memory one.
    pub fn open_store(&self) -> ConfigResult<SqliteRecordStore> {
        let store = match &self.db_path {
            Some(path) => SqliteRecordStore::open_with_timeout(path, self.busy_timeout())?,
            None => SqliteRecordStore::open_in_memory()?,
        };
        Ok(store)
    }

    /// Starts file logging when `log_dir` is set.
    ///
    /// Returns `false` when no log directory is configured.
    pub fn init_logging(&self) -> ConfigResult<bool> {
        let Some(dir) = &self.log_dir else {
            return Ok(false);
        };
        let dir = dir
            .to_str()
            .ok_or_else(|| ConfigError::Logging(format!("non-UTF-8 log_dir `{}`", dir.display())))?;
        init_logging(self.log_level, dir).map_err(ConfigError::Logging)?;
        Ok(true)
    }
}
