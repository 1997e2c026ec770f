//! Synchronous fan-out of history changes to subscribers.
//!
//! # Responsibility
//! - Register and unregister change handlers.
//! - Deliver every change to every handler, in registration order, on the
//!   publishing thread.
//!
//! # Invariants
//! - A handler that panics is logged and skipped; remaining handlers still
//!   run and the publisher never observes the panic.
//! - Handlers are invoked without holding the registry lock, so a handler may
//!   subscribe, unsubscribe or query the service re-entrantly.

use crate::model::notification::Notification;
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryChange {
    /// This notification was added or its read state changed.
    Changed(Notification),
    /// Many entries changed at once (mark-all-read, clear); re-query state.
    Bulk,
}

impl HistoryChange {
    /// Returns the affected notification, or `None` for bulk changes.
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Self::Changed(notification) => Some(notification),
            Self::Bulk => None,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type ChangeHandler = dyn Fn(&HistoryChange) + Send + Sync;

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Arc<ChangeHandler>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every subsequent change.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HistoryChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Removes one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.handlers().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }

    /// Invokes every handler with `change`.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, change: &HistoryChange) -> usize {
        let snapshot: Vec<(SubscriptionId, Arc<ChangeHandler>)> = self.handlers().clone();
        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(change))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    "event=listener_publish module=listener status=error subscription={} error_code=handler_panicked",
                    id.0
                ),
            }
        }
        delivered
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Arc<ChangeHandler>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
