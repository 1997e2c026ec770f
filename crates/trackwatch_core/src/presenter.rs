//! Platform presentation boundary.
//!
//! Rendering popups or tray entries lives outside this crate; the service
//! only talks to a `Presenter`.

use crate::model::notification::Severity;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by a presenter, e.g. the platform surface is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentError {
    message: String,
}

impl PresentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for PresentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "presentation failed: {}", self.message)
    }
}

impl Error for PresentError {}

/// Renders one notification on the host platform.
///
/// Called synchronously after the history change is published. Errors are
/// logged by the caller and never roll back the history.
pub trait Presenter: Send + Sync {
    fn show(&self, title: &str, message: &str, severity: Severity) -> Result<(), PresentError>;
}

/// Presenter for headless hosts: writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show(&self, title: &str, message: &str, severity: Severity) -> Result<(), PresentError> {
        // Message text is user data; only its size is logged.
        match severity {
            Severity::Info => info!(
                "event=notification_show module=presenter severity=info title={:?} message_chars={}",
                title,
                message.chars().count()
            ),
            Severity::Warning | Severity::Error => warn!(
                "event=notification_show module=presenter severity={} title={:?} message_chars={}",
                severity.as_str(),
                title,
                message.chars().count()
            ),
        }
        Ok(())
    }
}

/// Presenter that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPresenter;

impl Presenter for SilentPresenter {
    fn show(&self, _title: &str, _message: &str, _severity: Severity) -> Result<(), PresentError> {
        Ok(())
    }
}
