//! JSON file storage with atomic replace.
//!
//! # Responsibility
//! - Persist history and dedup records as two independent JSON files.
//! - Replace files atomically: write a sibling temp file, fsync, rename.
//!
//! # Invariants
//! - A crash mid-save leaves either the previous file or the new file,
//!   never a truncated one.
//! - A record that fails to decode is moved aside to `<file>.corrupt`
//!   before the error is returned.

use super::{
    HistoryRecord, NotifiedRecord, PersistenceError, PersistenceGateway, PersistenceResult,
    HISTORY_RECORD_VERSION, NOTIFIED_RECORD_VERSION,
};
use crate::model::notification::{Notification, TaskId};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

const CORRUPT_SUFFIX: &str = ".corrupt";

/// Gateway writing one JSON file per record.
#[derive(Debug, Clone)]
pub struct JsonFileGateway {
    history_path: PathBuf,
    notified_path: PathBuf,
}

impl JsonFileGateway {
    pub fn new(history_path: impl Into<PathBuf>, notified_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            notified_path: notified_path.into(),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn notified_path(&self) -> &Path {
        &self.notified_path
    }
}

impl PersistenceGateway for JsonFileGateway {
    fn save_history(&self, history: &[Notification]) -> PersistenceResult<()> {
        let record = HistoryRecord::new(history.to_vec());
        write_record(&self.history_path, &record)
    }

    fn load_history(&self) -> PersistenceResult<Vec<Notification>> {
        let Some(record) =
            read_record::<HistoryRecord>(&self.history_path, "history", HISTORY_RECORD_VERSION)?
        else {
            return Ok(Vec::new());
        };
        if let Err(err) = record.validate() {
            move_aside(&self.history_path);
            return Err(err);
        }
        Ok(record.notifications)
    }

    fn save_notified(&self, task_ids: &[TaskId]) -> PersistenceResult<()> {
        let record = NotifiedRecord::new(task_ids.to_vec());
        write_record(&self.notified_path, &record)
    }

    fn load_notified(&self) -> PersistenceResult<Vec<TaskId>> {
        let Some(record) = read_record::<NotifiedRecord>(
            &self.notified_path,
            "notified",
            NOTIFIED_RECORD_VERSION,
        )?
        else {
            return Ok(Vec::new());
        };
        if let Err(err) = record.validate() {
            move_aside(&self.notified_path);
            return Err(err);
        }
        Ok(record.task_ids)
    }
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> PersistenceResult<()> {
    let started_at = Instant::now();
    let bytes = serde_json::to_vec_pretty(record).map_err(PersistenceError::Encode)?;
    write_atomic(path, &bytes)?;
    debug!(
        "event=record_save module=persist status=ok backend=json bytes={} duration_ms={} path={}",
        bytes.len(),
        started_at.elapsed().as_millis(),
        path.display()
    );
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source: std::io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(&dir).map_err(io_err)?;
    let mut temp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    temp.as_file_mut().write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

/// Reads one versioned record. `Ok(None)` means the file does not exist.
fn read_record<T: DeserializeOwned>(
    path: &Path,
    record_name: &'static str,
    latest_supported: u32,
) -> PersistenceResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match decode_record(path, &bytes, record_name, latest_supported) {
        Ok(record) => Ok(Some(record)),
        Err(err) => {
            move_aside(path);
            Err(err)
        }
    }
}

fn decode_record<T: DeserializeOwned>(
    path: &Path,
    bytes: &[u8],
    record_name: &'static str,
    latest_supported: u32,
) -> PersistenceResult<T> {
    let decode_err = |source: serde_json::Error| PersistenceError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(decode_err)?;
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            PersistenceError::InvalidData(format!(
                "{record_name} record at `{}` has no version",
                path.display()
            ))
        })?;
    if version > u64::from(latest_supported) {
        return Err(PersistenceError::UnsupportedVersion {
            record: record_name,
            found: version,
            latest_supported,
        });
    }

    serde_json::from_value(value).map_err(decode_err)
}

fn move_aside(path: &Path) {
    let mut target: OsString = path.as_os_str().to_owned();
    target.push(CORRUPT_SUFFIX);
    let target = PathBuf::from(target);
    match fs::rename(path, &target) {
        Ok(()) => warn!(
            "event=record_quarantine module=persist status=ok path={} moved_to={}",
            path.display(),
            target.display()
        ),
        Err(err) => warn!(
            "event=record_quarantine module=persist status=error path={} error={}",
            path.display(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::JsonFileGateway;
    use crate::model::notification::{Notification, NotificationKind};
    use crate::persist::{PersistenceError, PersistenceGateway};
    use std::fs;

    fn gateway(dir: &std::path::Path) -> JsonFileGateway {
        JsonFileGateway::new(dir.join("history.json"), dir.join("notified.json"))
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path());
        assert!(gateway.load_history().unwrap().is_empty());
        assert!(gateway.load_notified().unwrap().is_empty());
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path());
        gateway
            .save_history(&[Notification::new(1, NotificationKind::Info, "x", None)])
            .unwrap();
        gateway.save_notified(&[1, 2]).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["history.json", "notified.json"]);
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path());
        fs::write(gateway.history_path(), "{\"version\":1,\"notifications\":[").unwrap();

        let err = gateway.load_history().unwrap_err();
        assert!(matches!(err, PersistenceError::Decode { .. }));
        assert!(!gateway.history_path().exists());
        assert!(dir.path().join("history.json.corrupt").exists());
    }

    #[test]
    fn non_utf8_file_is_moved_aside_before_next_save() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path());
        let garbage = b"\xff\xfe garbage".to_vec();
        fs::write(gateway.history_path(), &garbage).unwrap();

        let err = gateway.load_history().unwrap_err();
        assert!(matches!(err, PersistenceError::Decode { .. }));
        assert!(!gateway.history_path().exists());

        gateway.save_history(&[]).unwrap();
        let quarantined = fs::read(dir.path().join("history.json.corrupt")).unwrap();
        assert_eq!(quarantined, garbage);
    }

    #[test]
    fn newer_record_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path());
        fs::write(gateway.notified_path(), r#"{"version":99,"task_ids":[1]}"#).unwrap();

        let err = gateway.load_notified().unwrap_err();
        match err {
            PersistenceError::UnsupportedVersion {
                found,
                latest_supported,
                ..
            } => {
                assert_eq!(found, 99);
                assert_eq!(latest_supported, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
