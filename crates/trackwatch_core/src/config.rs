//! Runtime configuration for the notification service.
//!
//! # Invariants
//! - `max_history()` is always `10 * recent_items`.
//! - A config that passed `validate()` can be handed to
//!   `NotificationService::open` without further checks.

use crate::store::dedup::{DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_RETAIN};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Default size of the "recent items" list.
pub const DEFAULT_RECENT_ITEMS: usize = 10;
/// History keeps this many times `recent_items` entries.
pub const HISTORY_MULTIPLIER: usize = 10;

pub const DEFAULT_HISTORY_FILE: &str = "notification_history.json";
pub const DEFAULT_NOTIFIED_FILE: &str = "notified_tasks.json";
pub const DEFAULT_SQLITE_FILE: &str = "trackwatch.sqlite3";

/// Which persistence backend the service opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Two JSON files replaced atomically.
    #[default]
    JsonFiles,
    /// One SQLite database with a table per record.
    Sqlite,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

/// Service configuration. Missing fields in a config file take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Directory holding persisted records.
    pub data_dir: PathBuf,
    pub recent_items: usize,
    pub dedup_capacity: usize,
    pub dedup_retain: usize,
    pub history_file: String,
    pub notified_file: String,
    pub sqlite_file: String,
    pub backend: StorageBackend,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            recent_items: DEFAULT_RECENT_ITEMS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            dedup_retain: DEFAULT_DEDUP_RETAIN,
            history_file: DEFAULT_HISTORY_FILE.to_string(),
            notified_file: DEFAULT_NOTIFIED_FILE.to_string(),
            sqlite_file: DEFAULT_SQLITE_FILE.to_string(),
            backend: StorageBackend::default(),
        }
    }
}

impl NotifyConfig {
    /// Default config rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a JSON config file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_backend(mut self, backend: StorageBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_recent_items(mut self, recent_items: usize) -> Self {
        self.recent_items = recent_items;
        self
    }

    pub fn with_dedup_bounds(mut self, capacity: usize, retain: usize) -> Self {
        self.dedup_capacity = capacity;
        self.dedup_retain = retain;
        self
    }

    /// Maximum number of history entries kept.
    pub fn max_history(&self) -> usize {
        self.recent_items.saturating_mul(HISTORY_MULTIPLIER)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(&self.history_file)
    }

    pub fn notified_path(&self) -> PathBuf {
        self.data_dir.join(&self.notified_file)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(&self.sqlite_file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir cannot be empty".to_string()));
        }
        if self.recent_items == 0 {
            return Err(ConfigError::Invalid(
                "recent_items must be greater than zero".to_string(),
            ));
        }
        if self.dedup_retain == 0 || self.dedup_retain > self.dedup_capacity {
            return Err(ConfigError::Invalid(format!(
                "dedup_retain must be in 1..={}, got {}",
                self.dedup_capacity, self.dedup_retain
            )));
        }
        for (field, value) in [
            ("history_file", &self.history_file),
            ("notified_file", &self.notified_file),
            ("sqlite_file", &self.sqlite_file),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
            }
        }
        if self.history_file == self.notified_file {
            return Err(ConfigError::Invalid(
                "history_file and notified_file must differ".to_string(),
            ));
        }
        Ok(())
    }
}
