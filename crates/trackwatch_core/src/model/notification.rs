//! Notification domain model.
//!
//! # Responsibility
//! - Define the notification record and its classification enums.
//! - Allocate monotonically increasing notification ids.
//!
//! # Invariants
//! - `id` is never reused within a process, including across reloads.
//! - `id` never exceeds `MAX_NOTIFICATION_ID`, so the counter always has
//!   room to move past a loaded id.
//! - `read` transitions false -> true only.
//! - `task_id` is `None` for notifications that did not originate from a
//!   remote task; the tracker id `0` is normalized to `None`.

use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-unique notification identifier.
pub type NotificationId = u64;

/// Largest id a stored notification may carry. Matches the SQLite integer
/// range.
pub const MAX_NOTIFICATION_ID: NotificationId = i64::MAX as NotificationId;

/// Identifier of a task in the remote issue tracker.
pub type TaskId = u64;

/// Classification of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A task was created in the tracker.
    NewTask,
    /// An existing task changed.
    TaskUpdated,
    /// A comment was added to a task.
    NewComment,
    Info,
    Warning,
    Error,
}

impl NotificationKind {
    /// Stable string id used by storage and command-line input.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewTask => "new_task",
            Self::TaskUpdated => "task_updated",
            Self::NewComment => "new_comment",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Title shown by presenters above the message text.
    pub fn title(self) -> &'static str {
        match self {
            Self::NewTask => "New task",
            Self::TaskUpdated => "Task updated",
            Self::NewComment => "New comment",
            Self::Info => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    /// Presentation severity for this kind. Tracker events are informational.
    pub fn severity(self) -> Severity {
        match self {
            Self::NewTask | Self::TaskUpdated | Self::NewComment | Self::Info => Severity::Info,
            Self::Warning => Severity::Warning,
            Self::Error => Severity::Error,
        }
    }

    /// Returns whether this kind is produced by a tracker task event.
    pub fn is_task_event(self) -> bool {
        matches!(self, Self::NewTask | Self::TaskUpdated | Self::NewComment)
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKindError(pub String);

impl Display for UnknownKindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown notification kind `{}`; expected new_task|task_updated|new_comment|info|warning|error",
            self.0
        )
    }
}

impl Error for UnknownKindError {}

/// Parses a notification kind from its stable string id.
pub fn parse_notification_kind(value: &str) -> Result<NotificationKind, UnknownKindError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "new_task" => Ok(NotificationKind::NewTask),
        "task_updated" => Ok(NotificationKind::TaskUpdated),
        "new_comment" => Ok(NotificationKind::NewComment),
        "info" => Ok(NotificationKind::Info),
        "warning" => Ok(NotificationKind::Warning),
        "error" => Ok(NotificationKind::Error),
        other => Err(UnknownKindError(other.to_string())),
    }
}

/// Presentation severity passed to the platform presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One entry of the notification history.
///
/// Callers only ever hold copies; the history store owns the canonical
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    id: NotificationId,
    kind: NotificationKind,
    message: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_task_id"
    )]
    task_id: Option<TaskId>,
    #[serde(default)]
    read: bool,
    /// Unix epoch milliseconds.
    created_at_ms: i64,
}

impl Notification {
    /// Creates an unread notification stamped with the current time.
    pub fn new(
        id: NotificationId,
        kind: NotificationKind,
        message: impl Into<String>,
        task_id: Option<TaskId>,
    ) -> Self {
        Self::with_created_at(id, kind, message, task_id, now_epoch_ms())
    }

    /// Creates an unread notification with a caller-provided timestamp.
    ///
    /// Used by restore paths and tests where the creation time is known.
    pub fn with_created_at(
        id: NotificationId,
        kind: NotificationKind,
        message: impl Into<String>,
        task_id: Option<TaskId>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id,
            kind,
            message: message.into(),
            task_id: normalize_task_id(task_id),
            read: false,
            created_at_ms,
        }
    }

    pub fn id(&self) -> NotificationId {
        self.id
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Marks this notification read.
    ///
    /// Returns `true` when the read flag actually changed.
    pub fn mark_read(&mut self) -> bool {
        let changed = !self.read;
        self.read = true;
        changed
    }
}

/// Normalizes the tracker convention of `0` meaning "no task".
pub fn normalize_task_id(task_id: Option<TaskId>) -> Option<TaskId> {
    task_id.filter(|id| *id != 0)
}

fn deserialize_task_id<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<TaskId>::deserialize(deserializer).map(normalize_task_id)
}

/// Monotonic notification id allocator.
///
/// Ids start at 1. `reseed` only ever moves the counter forward.
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> NotificationId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Moves the counter past `max_seen` if it is not already there.
    pub fn reseed(&self, max_seen: NotificationId) {
        self.next
            .fetch_max(max_seen.saturating_add(1), Ordering::SeqCst);
    }

    /// Returns the id the next call to `next_id` will hand out.
    pub fn peek(&self) -> NotificationId {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{parse_notification_kind, IdSequence, Notification, NotificationKind, Severity};

    #[test]
    fn zero_task_id_is_normalized_when_decoded() {
        let notification: Notification = serde_json::from_str(
            r##"{"id":3,"kind":"new_task","message":"#0","task_id":0,"created_at_ms":1}"##,
        )
        .unwrap();
        assert_eq!(notification.task_id(), None);

        let notification: Notification = serde_json::from_str(
            r##"{"id":4,"kind":"new_task","message":"#8","task_id":8,"created_at_ms":1}"##,
        )
        .unwrap();
        assert_eq!(notification.task_id(), Some(8));
    }

    #[test]
    fn zero_task_id_is_normalized_to_none() {
        let notification = Notification::new(1, NotificationKind::Info, "hello", Some(0));
        assert_eq!(notification.task_id(), None);
    }

    #[test]
    fn mark_read_is_monotone() {
        let mut notification = Notification::new(1, NotificationKind::NewTask, "#5", Some(5));
        assert!(!notification.is_read());
        assert!(notification.mark_read());
        assert!(!notification.mark_read());
        assert!(notification.is_read());
    }

    #[test]
    fn id_sequence_reseed_never_moves_backwards() {
        let sequence = IdSequence::new();
        assert_eq!(sequence.next_id(), 1);
        sequence.reseed(41);
        assert_eq!(sequence.next_id(), 42);
        sequence.reseed(10);
        assert_eq!(sequence.next_id(), 43);
    }

    #[test]
    fn kind_strings_roundtrip_through_parser() {
        for kind in [
            NotificationKind::NewTask,
            NotificationKind::TaskUpdated,
            NotificationKind::NewComment,
            NotificationKind::Info,
            NotificationKind::Warning,
            NotificationKind::Error,
        ] {
            assert_eq!(parse_notification_kind(kind.as_str()), Ok(kind));
        }
        assert!(parse_notification_kind("bogus").is_err());
    }

    #[test]
    fn task_events_present_as_info() {
        assert_eq!(NotificationKind::NewComment.severity(), Severity::Info);
        assert_eq!(NotificationKind::Warning.severity(), Severity::Warning);
        assert!(NotificationKind::TaskUpdated.is_task_event());
        assert!(!NotificationKind::Error.is_task_event());
    }
}
