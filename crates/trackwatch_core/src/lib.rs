//! Core of the trackwatch notifier.
//!
//! Records issue-tracker events as a bounded, persisted notification
//! history, suppresses repeat notifications per task and fans changes out to
//! subscribers. Rendering is delegated to a `Presenter`.

pub mod config;
pub mod db;
pub mod listener;
pub mod logging;
pub mod model;
pub mod persist;
pub mod presenter;
pub mod service;
pub mod store;

pub use config::{ConfigError, NotifyConfig, StorageBackend};
pub use listener::{HistoryChange, ListenerRegistry, SubscriptionId};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::notification::{
    parse_notification_kind, Notification, NotificationId, NotificationKind, Severity, TaskId,
    MAX_NOTIFICATION_ID,
};
pub use persist::{
    JsonFileGateway, PersistenceError, PersistenceGateway, PersistenceResult, SqliteGateway,
};
pub use presenter::{LogPresenter, PresentError, Presenter, SilentPresenter};
pub use service::notification_service::{CreateOutcome, NotificationService, ServiceError};
pub use store::dedup::DedupTracker;
pub use store::history::HistoryStore;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
