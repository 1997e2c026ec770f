//! Notification service facade.
//!
//! # Responsibility
//! - Compose history, dedup, listeners, persistence and presentation into
//!   the single API used by event producers and the presentation layer.
//! - Run the create pipeline: dedup gate -> append (persist + publish) ->
//!   present.
//!
//! # Invariants
//! - A task id yields at most one history entry until it is evicted from
//!   the dedup set, even with concurrent producers.
//! - No method fails because of storage or presentation errors after the
//!   service is open; those are logged and the in-memory state stands.
//! - There is no global instance; callers own the service and share it by
//!   reference or `Arc`.

use crate::config::{ConfigError, NotifyConfig, StorageBackend};
use crate::listener::{HistoryChange, ListenerRegistry, SubscriptionId};
use crate::model::notification::{
    normalize_task_id, Notification, NotificationId, NotificationKind, TaskId,
};
use crate::persist::{JsonFileGateway, PersistenceError, PersistenceGateway, SqliteGateway};
use crate::presenter::Presenter;
use crate::store::dedup::DedupTracker;
use crate::store::history::HistoryStore;
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Failure to open the service. Nothing fails after `open` succeeds.
#[derive(Debug)]
pub enum ServiceError {
    Config(ConfigError),
    /// The storage location itself is unusable (not a corrupt record).
    Storage(PersistenceError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "notification storage unavailable: {err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<PersistenceError> for ServiceError {
    fn from(value: PersistenceError) -> Self {
        Self::Storage(value)
    }
}

/// Result of `create_notification`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Notification),
    /// The task was already notified; nothing was recorded.
    Deduplicated { task_id: TaskId },
}

impl CreateOutcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Self::Created(notification) => Some(notification),
            Self::Deduplicated { .. } => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

pub struct NotificationService {
    config: NotifyConfig,
    history: HistoryStore,
    dedup: DedupTracker,
    listeners: Arc<ListenerRegistry>,
    presenter: Arc<dyn Presenter>,
}

impl NotificationService {
    /// Opens the configured backend under `config.data_dir` and loads both
    /// records. Unreadable records start empty (logged).
    ///
    /// # Errors
    /// - Invalid configuration.
    /// - `data_dir` cannot be created, or the SQLite database cannot be
    ///   opened.
    pub fn open(config: NotifyConfig, presenter: Arc<dyn Presenter>) -> Result<Self, ServiceError> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|source| PersistenceError::Io {
            path: config.data_dir.clone(),
            source,
        })?;

        let gateway: Arc<dyn PersistenceGateway> = match config.backend {
            StorageBackend::JsonFiles => Arc::new(JsonFileGateway::new(
                config.history_path(),
                config.notified_path(),
            )),
            StorageBackend::Sqlite => Arc::new(SqliteGateway::open(config.sqlite_path())?),
        };
        Self::with_gateway(config, gateway, presenter)
    }

    /// Builds the service on a caller-provided gateway.
    pub fn with_gateway(
        config: NotifyConfig,
        gateway: Arc<dyn PersistenceGateway>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let listeners = Arc::new(ListenerRegistry::new());
        let history = HistoryStore::load(
            config.max_history(),
            Arc::clone(&gateway),
            Arc::clone(&listeners),
        );
        let dedup = DedupTracker::load(config.dedup_capacity, config.dedup_retain, gateway);

        info!(
            "event=service_open module=service status=ok backend={:?} history={} unread={} notified={}",
            config.backend,
            history.len(),
            history.unread_count(),
            dedup.len()
        );

        Ok(Self {
            config,
            history,
            dedup,
            listeners,
            presenter,
        })
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Records a tracker event and presents it.
    ///
    /// With a task id, the notification is created only the first time that
    /// id is seen. The dedup mark is claimed before the entry is appended so
    /// concurrent producers for the same task cannot both get through.
    pub fn create_notification(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        task_id: Option<TaskId>,
    ) -> CreateOutcome {
        let task_id = normalize_task_id(task_id);
        if let Some(task_id) = task_id {
            if !self.dedup.mark_as_notified(task_id) {
                debug!(
                    "event=notification_create module=service status=deduplicated kind={} task_id={}",
                    kind, task_id
                );
                return CreateOutcome::Deduplicated { task_id };
            }
        }

        CreateOutcome::Created(self.record(kind, message.into(), task_id))
    }

    /// Records a notification that is not tied to a tracker task. Never
    /// deduplicated.
    pub fn notify(&self, kind: NotificationKind, message: impl Into<String>) -> Notification {
        self.record(kind, message.into(), None)
    }

    /// Newest-first copy of the whole history.
    pub fn get_all(&self) -> Vec<Notification> {
        self.history.all()
    }

    pub fn get_unread(&self) -> Vec<Notification> {
        self.history.unread()
    }

    pub fn get_unread_count(&self) -> usize {
        self.history.unread_count()
    }

    /// The `recent_items` newest entries.
    pub fn recent(&self) -> Vec<Notification> {
        self.history.recent(self.config.recent_items)
    }

    pub fn get(&self, id: NotificationId) -> Option<Notification> {
        self.history.get(id)
    }

    pub fn has_been_notified(&self, task_id: TaskId) -> bool {
        self.dedup.has_been_notified(task_id)
    }

    /// Number of task ids currently held by the dedup set.
    pub fn notified_count(&self) -> usize {
        self.dedup.len()
    }

    /// Marks one notification read. Unknown ids are ignored.
    pub fn mark_as_read(&self, id: NotificationId) -> bool {
        self.history.mark_read(id)
    }

    pub fn mark_all_as_read(&self) -> usize {
        self.history.mark_all_read()
    }

    /// Empties the history. The dedup set is left untouched so cleared
    /// tasks do not notify again.
    pub fn clear_all(&self) {
        self.history.clear();
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HistoryChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Saves both records one last time and detaches all subscribers.
    pub fn close(self) {
        let history_status = self.history.flush();
        let dedup_status = self.dedup.flush();
        for (record, status) in [("history", history_status), ("notified", dedup_status)] {
            if let Err(err) = status {
                warn!(
                    "event=service_close module=service status=error record={} error_code={} error={}",
                    record,
                    err.code(),
                    err
                );
            }
        }
        self.listeners.clear();
        info!(
            "event=service_close module=service status=ok history={} notified={}",
            self.history.len(),
            self.dedup.len()
        );
    }

    fn record(
        &self,
        kind: NotificationKind,
        message: String,
        task_id: Option<TaskId>,
    ) -> Notification {
        let notification = Notification::new(self.history.next_id(), kind, message, task_id);
        self.history.append(notification.clone());
        debug!(
            "event=notification_create module=service status=ok kind={} id={} task_id={:?}",
            kind,
            notification.id(),
            task_id
        );
        self.present(&notification);
        notification
    }

    fn present(&self, notification: &Notification) {
        let kind = notification.kind();
        let shown = catch_unwind(AssertUnwindSafe(|| {
            self.presenter
                .show(kind.title(), notification.message(), kind.severity())
        }));
        match shown {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                "event=notification_present module=service status=error id={} error_code=present_failed error={}",
                notification.id(),
                err
            ),
            Err(_) => warn!(
                "event=notification_present module=service status=error id={} error_code=presenter_panicked",
                notification.id()
            ),
        }
    }
}
