//! Durable storage for notification history and the dedup set.
//!
//! # Responsibility
//! - Define the storage contract used by `HistoryStore` and `DedupTracker`.
//! - Define the versioned record schema written to disk.
//!
//! # Invariants
//! - A save is all-or-nothing from the point of view of the next load.
//! - Loads never return partially-parsed data: a record either decodes
//!   fully or the load fails.
//! - Records carry an explicit `version`; unknown fields are ignored so
//!   older binaries can read additive schema changes.

use crate::db::DbError;
use crate::model::notification::{Notification, TaskId, MAX_NOTIFICATION_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod json_file;
pub mod sqlite;

pub use json_file::JsonFileGateway;
pub use sqlite::SqliteGateway;

/// Latest history record schema version written by this binary.
pub const HISTORY_RECORD_VERSION: u32 = 1;
/// Latest dedup record schema version written by this binary.
pub const NOTIFIED_RECORD_VERSION: u32 = 1;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Storage failure for history or dedup records.
#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Encode(serde_json::Error),
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    UnsupportedVersion {
        record: &'static str,
        found: u64,
        latest_supported: u32,
    },
    Db(DbError),
    InvalidData(String),
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "i/o error on `{}`: {source}", path.display()),
            Self::Encode(err) => write!(f, "failed to encode record: {err}"),
            Self::Decode { path, source } => {
                write!(f, "failed to decode `{}`: {source}", path.display())
            }
            Self::UnsupportedVersion {
                record,
                found,
                latest_supported,
            } => write!(
                f,
                "{record} record version {found} is newer than supported {latest_supported}"
            ),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Encode(err) => Some(err),
            Self::Decode { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::UnsupportedVersion { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for PersistenceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl PersistenceError {
    /// Short machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io_failed",
            Self::Encode(_) => "encode_failed",
            Self::Decode { .. } => "decode_failed",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::Db(_) => "db_failed",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

/// Storage contract for the two independent durable records.
///
/// History is passed and returned newest-first. Dedup ids are passed and
/// returned in insertion order, oldest first, so eviction order survives a
/// restart.
pub trait PersistenceGateway: Send + Sync {
    fn save_history(&self, history: &[Notification]) -> PersistenceResult<()>;
    /// Returns an empty history when nothing has been saved yet.
    fn load_history(&self) -> PersistenceResult<Vec<Notification>>;
    fn save_notified(&self, task_ids: &[TaskId]) -> PersistenceResult<()>;
    /// Returns an empty list when nothing has been saved yet.
    fn load_notified(&self) -> PersistenceResult<Vec<TaskId>>;
}

/// On-disk history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub version: u32,
    /// Newest-first.
    pub notifications: Vec<Notification>,
}

impl HistoryRecord {
    pub fn new(notifications: Vec<Notification>) -> Self {
        Self {
            version: HISTORY_RECORD_VERSION,
            notifications,
        }
    }

    /// Rejects records that could not have been produced by a history store.
    pub fn validate(&self) -> PersistenceResult<()> {
        validate_history(&self.notifications)
    }
}

/// On-disk dedup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifiedRecord {
    pub version: u32,
    /// Insertion order, oldest first.
    pub task_ids: Vec<TaskId>,
}

impl NotifiedRecord {
    pub fn new(task_ids: Vec<TaskId>) -> Self {
        Self {
            version: NOTIFIED_RECORD_VERSION,
            task_ids,
        }
    }

    pub fn validate(&self) -> PersistenceResult<()> {
        ensure_unique(self.task_ids.iter().copied(), "task id")
    }
}

/// Rejects duplicate ids and ids above `MAX_NOTIFICATION_ID`.
pub fn validate_history(notifications: &[Notification]) -> PersistenceResult<()> {
    if let Some(notification) = notifications
        .iter()
        .find(|notification| notification.id() > MAX_NOTIFICATION_ID)
    {
        return Err(PersistenceError::InvalidData(format!(
            "notification id `{}` exceeds `{MAX_NOTIFICATION_ID}`",
            notification.id()
        )));
    }
    ensure_unique(notifications.iter().map(Notification::id), "notification id")
}

fn ensure_unique(ids: impl Iterator<Item = u64>, label: &str) -> PersistenceResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(PersistenceError::InvalidData(format!(
                "duplicate {label} `{id}`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{HistoryRecord, NotifiedRecord, PersistenceError};
    use crate::model::notification::{Notification, NotificationKind};

    #[test]
    fn history_record_rejects_duplicate_ids() {
        let record = HistoryRecord::new(vec![
            Notification::new(3, NotificationKind::Info, "a", None),
            Notification::new(3, NotificationKind::Info, "b", None),
        ]);
        let err = record.validate().expect_err("duplicate ids must be rejected");
        assert!(matches!(err, PersistenceError::InvalidData(_)));
    }

    #[test]
    fn history_record_rejects_ids_without_room_to_grow() {
        let record = HistoryRecord::new(vec![Notification::new(
            u64::MAX,
            NotificationKind::Info,
            "a",
            None,
        )]);
        let err = record.validate().expect_err("exhausted id must be rejected");
        assert!(matches!(err, PersistenceError::InvalidData(_)));
    }

    #[test]
    fn notified_record_ignores_unknown_fields() {
        let record: NotifiedRecord = serde_json::from_str(
            r#"{"version":1,"task_ids":[4,9],"written_by":"future build"}"#,
        )
        .unwrap();
        assert_eq!(record.task_ids, vec![4, 9]);
        record.validate().unwrap();
    }
}
