//! SQLite storage backend.
//!
//! # Responsibility
//! - Persist history and dedup records into two tables of one database.
//! - Replace each record inside a single transaction.
//!
//! # Invariants
//! - `position` columns carry record order (history newest-first, dedup
//!   oldest-first); row ids are never used for ordering.
//! - Rows that do not decode into a valid notification fail the whole load.

use super::{PersistenceError, PersistenceGateway, PersistenceResult};
use crate::db::{open_db, open_db_in_memory};
use crate::model::notification::{parse_notification_kind, Notification, TaskId};
use log::debug;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Gateway backed by one SQLite database file.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Opens (and migrates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> PersistenceResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn save_history(&self, history: &[Notification]) -> PersistenceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM notifications;", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO notifications (
                    position,
                    id,
                    kind,
                    message,
                    task_id,
                    is_read,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for (position, notification) in history.iter().enumerate() {
                let task_id = notification.task_id().map(to_sql_int).transpose()?;
                stmt.execute(params![
                    to_sql_int(position as u64)?,
                    to_sql_int(notification.id())?,
                    notification.kind().as_str(),
                    notification.message(),
                    task_id,
                    i64::from(notification.is_read()),
                    notification.created_at_ms(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(
            "event=record_save module=persist status=ok backend=sqlite record=history rows={}",
            history.len()
        );
        Ok(())
    }

    fn load_history(&self) -> PersistenceResult<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, kind, message, task_id, is_read, created_at
             FROM notifications
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut history = Vec::new();
        while let Some(row) = rows.next()? {
            history.push(parse_notification_row(row)?);
        }
        Ok(history)
    }

    fn save_notified(&self, task_ids: &[TaskId]) -> PersistenceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM notified_tasks;", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO notified_tasks (position, task_id) VALUES (?1, ?2);")?;
            for (position, task_id) in task_ids.iter().enumerate() {
                stmt.execute(params![to_sql_int(position as u64)?, to_sql_int(*task_id)?])?;
            }
        }
        tx.commit()?;
        debug!(
            "event=record_save module=persist status=ok backend=sqlite record=notified rows={}",
            task_ids.len()
        );
        Ok(())
    }

    fn load_notified(&self) -> PersistenceResult<Vec<TaskId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT task_id FROM notified_tasks ORDER BY position ASC;")?;
        let mut rows = stmt.query([])?;
        let mut task_ids = Vec::new();
        while let Some(row) = rows.next()? {
            task_ids.push(from_sql_int(row.get(0)?, "notified_tasks.task_id")?);
        }
        Ok(task_ids)
    }
}

fn parse_notification_row(row: &Row<'_>) -> PersistenceResult<Notification> {
    let id = from_sql_int(row.get("id")?, "notifications.id")?;

    let kind_text: String = row.get("kind")?;
    let kind = parse_notification_kind(&kind_text).map_err(|_| {
        PersistenceError::InvalidData(format!(
            "invalid kind `{kind_text}` in notifications.kind"
        ))
    })?;

    let task_id = match row.get::<_, Option<i64>>("task_id")? {
        Some(value) => Some(from_sql_int(value, "notifications.task_id")?),
        None => None,
    };

    let read = match row.get::<_, i64>("is_read")? {
        0 => false,
        1 => true,
        other => {
            return Err(PersistenceError::InvalidData(format!(
                "invalid is_read value `{other}` in notifications.is_read"
            )));
        }
    };

    let mut notification = Notification::with_created_at(
        id,
        kind,
        row.get::<_, String>("message")?,
        task_id,
        row.get("created_at")?,
    );
    if read {
        notification.mark_read();
    }
    Ok(notification)
}

fn to_sql_int(value: u64) -> PersistenceResult<i64> {
    i64::try_from(value).map_err(|_| {
        PersistenceError::InvalidData(format!("value `{value}` exceeds sqlite integer range"))
    })
}

fn from_sql_int(value: i64, column: &str) -> PersistenceResult<u64> {
    u64::try_from(value).map_err(|_| {
        PersistenceError::InvalidData(format!("negative value `{value}` in {column}"))
    })
}
