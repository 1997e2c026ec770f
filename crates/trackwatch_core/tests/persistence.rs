use std::fs;
use std::sync::Arc;
use trackwatch_core::db::migrations::latest_version;
use trackwatch_core::db::{open_db, DbError};
use trackwatch_core::{
    HistoryStore, JsonFileGateway, ListenerRegistry, Notification, NotificationKind,
    PersistenceError, PersistenceGateway, PersistenceResult, SqliteGateway, TaskId,
};

fn json_gateway(dir: &std::path::Path) -> JsonFileGateway {
    JsonFileGateway::new(dir.join("history.json"), dir.join("notified.json"))
}

fn sample_history() -> Vec<Notification> {
    let mut read = Notification::with_created_at(
        11,
        NotificationKind::NewComment,
        "Re: #5",
        Some(5),
        1_700_000_002_000,
    );
    read.mark_read();
    vec![
        Notification::with_created_at(
            12,
            NotificationKind::Error,
            "sync failed",
            None,
            1_700_000_003_000,
        ),
        read,
        Notification::with_created_at(
            10,
            NotificationKind::NewTask,
            "#7 Crash on start",
            Some(7),
            1_700_000_001_000,
        ),
    ]
}

#[test]
fn json_history_roundtrip_including_empty() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());

    gateway.save_history(&sample_history()).unwrap();
    assert_eq!(gateway.load_history().unwrap(), sample_history());

    gateway.save_history(&[]).unwrap();
    assert!(gateway.load_history().unwrap().is_empty());
}

#[test]
fn sqlite_history_roundtrip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trackwatch.sqlite3");

    SqliteGateway::open(&path)
        .unwrap()
        .save_history(&sample_history())
        .unwrap();

    let reopened = SqliteGateway::open(&path).unwrap();
    assert_eq!(reopened.load_history().unwrap(), sample_history());
}

#[test]
fn json_record_is_versioned_and_self_describing() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    gateway.save_notified(&[3, 1, 2]).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(gateway.notified_path()).unwrap()).unwrap();
    assert_eq!(value["version"], 1);
    assert_eq!(value["task_ids"], serde_json::json!([3, 1, 2]));
}

#[test]
fn corrupt_history_loads_as_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    fs::write(gateway.history_path(), b"\x00\x01 not json").unwrap();

    let store = HistoryStore::load(
        100,
        Arc::new(gateway.clone()),
        Arc::new(ListenerRegistry::new()),
    );
    assert!(store.is_empty());
    assert_eq!(store.next_id(), 1);
}

#[test]
fn non_utf8_history_is_quarantined_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    fs::write(gateway.history_path(), b"\xff\xfe garbage").unwrap();

    let store = HistoryStore::load(
        100,
        Arc::new(gateway.clone()),
        Arc::new(ListenerRegistry::new()),
    );
    assert!(store.is_empty());
    store.append(Notification::new(store.next_id(), NotificationKind::Info, "fresh", None));

    let corrupt = dir.path().join("history.json.corrupt");
    assert_eq!(fs::read(corrupt).unwrap(), b"\xff\xfe garbage");
    assert_eq!(gateway.load_history().unwrap().len(), 1);
}

#[test]
fn zero_task_id_in_stored_record_loads_as_no_task() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    fs::write(
        gateway.history_path(),
        r#"{"version":1,"notifications":[
            {"id":1,"kind":"info","message":"m","task_id":0,"created_at_ms":5}
        ]}"#,
    )
    .unwrap();

    let loaded = gateway.load_history().unwrap();
    assert_eq!(loaded[0].task_id(), None);
}

#[test]
fn exhausted_id_in_json_record_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    gateway
        .save_history(&[Notification::new(u64::MAX, NotificationKind::Info, "x", None)])
        .unwrap();

    let store = HistoryStore::load(
        100,
        Arc::new(gateway.clone()),
        Arc::new(ListenerRegistry::new()),
    );
    assert!(store.is_empty());
    assert_eq!(store.next_id(), 1);
    assert!(dir.path().join("history.json.corrupt").exists());
}

/// Gateway returning a fixed history, for checks that do not depend on a
/// storage format.
struct FixedHistory(Vec<Notification>);

impl PersistenceGateway for FixedHistory {
    fn save_history(&self, _history: &[Notification]) -> PersistenceResult<()> {
        Ok(())
    }

    fn load_history(&self) -> PersistenceResult<Vec<Notification>> {
        Ok(self.0.clone())
    }

    fn save_notified(&self, _task_ids: &[TaskId]) -> PersistenceResult<()> {
        Ok(())
    }

    fn load_notified(&self) -> PersistenceResult<Vec<TaskId>> {
        Ok(Vec::new())
    }
}

#[test]
fn store_never_reuses_an_exhausted_loaded_id() {
    let gateway = FixedHistory(vec![Notification::new(
        u64::MAX,
        NotificationKind::Info,
        "x",
        None,
    )]);

    let store = HistoryStore::load(100, Arc::new(gateway), Arc::new(ListenerRegistry::new()));
    assert!(store.is_empty());
    assert_ne!(store.next_id(), u64::MAX);
}

#[test]
fn missing_version_is_invalid_data() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = json_gateway(dir.path());
    fs::write(gateway.history_path(), r#"{"notifications":[]}"#).unwrap();

    let err = gateway.load_history().unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidData(_)));
}

#[test]
fn reload_reseeds_id_counter_past_loaded_ids() {
    let dir = tempfile::tempdir().unwrap();
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(json_gateway(dir.path()));
    gateway.save_history(&sample_history()).unwrap();

    let store = HistoryStore::load(100, Arc::clone(&gateway), Arc::new(ListenerRegistry::new()));
    assert_eq!(store.len(), 3);
    let next = store.next_id();
    assert!(sample_history().iter().all(|n| next > n.id()));
    assert_eq!(next, 13);
}

#[test]
fn reseed_counts_ids_trimmed_by_smaller_cap() {
    let dir = tempfile::tempdir().unwrap();
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(json_gateway(dir.path()));
    // Highest id is last, so a cap of 1 trims it away.
    gateway
        .save_history(&[
            Notification::new(4, NotificationKind::Info, "kept", None),
            Notification::new(90, NotificationKind::Info, "trimmed", None),
        ])
        .unwrap();

    let store = HistoryStore::load(1, gateway, Arc::new(ListenerRegistry::new()));
    assert_eq!(store.len(), 1);
    assert_eq!(store.next_id(), 91);
}

#[test]
fn sqlite_rejects_newer_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}
