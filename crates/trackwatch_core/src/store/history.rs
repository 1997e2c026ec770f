//! Bounded, ordered notification history.
//!
//! # Responsibility
//! - Own the canonical notification collection and its read state.
//! - Persist a consistent snapshot after every mutation, then publish the
//!   change to subscribers.
//!
//! # Invariants
//! - Entries are ordered newest-first by insertion, never by timestamp.
//! - `len() <= max_history` whenever the state lock is released.
//! - `unread_count()` is derived from the entries; there is no cached counter.
//! - Mutations are serialized by `persist_lock`, so snapshots reach the
//!   gateway in the same order they were taken. Disk I/O never happens under
//!   the state lock, and publishing happens after both locks are released.
//! - Change events are not ordered across threads: two concurrent mutations
//!   are saved in order but their events may reach subscribers in either
//!   order. Subscribers needing the latest state query the store.
//! - Loaded ids are validated before the counter is reseeded, so a record
//!   with duplicate or out-of-range ids starts the store empty.

use crate::listener::{HistoryChange, ListenerRegistry};
use crate::model::notification::{IdSequence, Notification, NotificationId};
use crate::persist::{validate_history, PersistenceGateway, PersistenceResult};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct HistoryStore {
    max_history: usize,
    entries: Mutex<VecDeque<Notification>>,
    persist_lock: Mutex<()>,
    ids: IdSequence,
    gateway: Arc<dyn PersistenceGateway>,
    listeners: Arc<ListenerRegistry>,
}

impl HistoryStore {
    /// Creates an empty store. Nothing is read from the gateway.
    pub fn new(
        max_history: usize,
        gateway: Arc<dyn PersistenceGateway>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            max_history: max_history.max(1),
            entries: Mutex::new(VecDeque::new()),
            persist_lock: Mutex::new(()),
            ids: IdSequence::new(),
            gateway,
            listeners,
        }
    }

    /// Creates a store seeded from the gateway.
    ///
    /// A failed load is logged and the store starts empty. The id counter is
    /// reseeded past every loaded id, including ids trimmed by a smaller
    /// `max_history`.
    pub fn load(
        max_history: usize,
        gateway: Arc<dyn PersistenceGateway>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let store = Self::new(max_history, gateway, listeners);
        let loaded = store.gateway.load_history().and_then(|loaded| {
            validate_history(&loaded)?;
            Ok(loaded)
        });
        match loaded {
            Ok(mut loaded) => {
                if let Some(max_id) = loaded.iter().map(Notification::id).max() {
                    store.ids.reseed(max_id);
                }
                let loaded_count = loaded.len();
                loaded.truncate(store.max_history);
                info!(
                    "event=history_load module=store status=ok loaded={} kept={} next_id={}",
                    loaded_count,
                    loaded.len(),
                    store.ids.peek()
                );
                *store.entries() = loaded.into();
            }
            Err(err) => error!(
                "event=history_load module=store status=error error_code={} error={}",
                err.code(),
                err
            ),
        }
        store
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Allocates the id for the next notification.
    pub fn next_id(&self) -> NotificationId {
        self.ids.next_id()
    }

    /// Inserts `notification` as the newest entry, dropping the oldest
    /// entries beyond `max_history`.
    pub fn append(&self, notification: Notification) {
        let persist_guard = self.persist_lock();
        let snapshot = {
            let mut entries = self.entries();
            entries.push_front(notification.clone());
            entries.truncate(self.max_history);
            snapshot_of(&entries)
        };
        self.persist(&snapshot, "append");
        drop(persist_guard);

        self.listeners.publish(&HistoryChange::Changed(notification));
    }

    /// Newest-first copy of every entry.
    pub fn all(&self) -> Vec<Notification> {
        snapshot_of(&self.entries())
    }

    /// Newest-first copy of unread entries.
    pub fn unread(&self) -> Vec<Notification> {
        self.entries()
            .iter()
            .filter(|notification| !notification.is_read())
            .cloned()
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|notification| !notification.is_read())
            .count()
    }

    /// Newest-first copy of at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        self.entries().iter().take(limit).cloned().collect()
    }

    pub fn get(&self, id: NotificationId) -> Option<Notification> {
        self.entries()
            .iter()
            .find(|notification| notification.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Marks one entry read.
    ///
    /// Unknown ids (for example already trimmed) and already-read entries are
    /// silent no-ops. Returns `true` when state changed.
    pub fn mark_read(&self, id: NotificationId) -> bool {
        let persist_guard = self.persist_lock();
        let changed = {
            let mut entries = self.entries();
            let updated = entries
                .iter_mut()
                .find(|notification| notification.id() == id)
                .filter(|notification| !notification.is_read())
                .map(|notification| {
                    notification.mark_read();
                    notification.clone()
                });
            updated.map(|notification| (notification, snapshot_of(&entries)))
        };
        let Some((notification, snapshot)) = changed else {
            return false;
        };
        self.persist(&snapshot, "mark_read");
        drop(persist_guard);

        self.listeners.publish(&HistoryChange::Changed(notification));
        true
    }

    /// Marks every entry read with one save and one bulk publish.
    ///
    /// Returns the number of entries whose state changed.
    pub fn mark_all_read(&self) -> usize {
        let persist_guard = self.persist_lock();
        let (changed, snapshot) = {
            let mut entries = self.entries();
            let changed = entries
                .iter_mut()
                .map(Notification::mark_read)
                .filter(|changed| *changed)
                .count();
            (changed, snapshot_of(&entries))
        };
        self.persist(&snapshot, "mark_all_read");
        drop(persist_guard);

        self.listeners.publish(&HistoryChange::Bulk);
        changed
    }

    /// Removes every entry. The empty history is saved before subscribers
    /// are told, so a reload never resurrects cleared entries.
    pub fn clear(&self) {
        let persist_guard = self.persist_lock();
        self.entries().clear();
        self.persist(&[], "clear");
        drop(persist_guard);

        self.listeners.publish(&HistoryChange::Bulk);
    }

    /// Saves the current state, returning the gateway error if any.
    pub fn flush(&self) -> PersistenceResult<()> {
        let _persist_guard = self.persist_lock();
        let snapshot = self.all();
        self.gateway.save_history(&snapshot)
    }

    fn persist(&self, snapshot: &[Notification], operation: &'static str) {
        if let Err(err) = self.gateway.save_history(snapshot) {
            warn!(
                "event=history_save module=store status=error operation={} entries={} error_code={} error={}",
                operation,
                snapshot.len(),
                err.code(),
                err
            );
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_lock(&self) -> MutexGuard<'_, ()> {
        self.persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn snapshot_of(entries: &VecDeque<Notification>) -> Vec<Notification> {
    entries.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::HistoryStore;
    use crate::listener::{HistoryChange, ListenerRegistry};
    use crate::model::notification::{Notification, NotificationKind};
    use crate::persist::{PersistenceGateway, SqliteGateway};
    use std::sync::{Arc, Mutex};

    fn new_store(max_history: usize) -> (HistoryStore, Arc<ListenerRegistry>) {
        let listeners = Arc::new(ListenerRegistry::new());
        let gateway: Arc<dyn PersistenceGateway> =
            Arc::new(SqliteGateway::open_in_memory().unwrap());
        (
            HistoryStore::new(max_history, gateway, Arc::clone(&listeners)),
            listeners,
        )
    }

    fn push(store: &HistoryStore, task_id: u64) -> u64 {
        let id = store.next_id();
        store.append(Notification::new(
            id,
            NotificationKind::NewTask,
            format!("#{task_id}"),
            Some(task_id),
        ));
        id
    }

    #[test]
    fn append_inserts_newest_first_and_trims_oldest() {
        let (store, _) = new_store(3);
        for task_id in 1..=5 {
            push(&store, task_id);
        }
        let task_ids: Vec<_> = store
            .all()
            .iter()
            .filter_map(Notification::task_id)
            .collect();
        assert_eq!(task_ids, vec![5, 4, 3]);
    }

    #[test]
    fn mark_read_unknown_id_publishes_nothing() {
        let (store, listeners) = new_store(10);
        push(&store, 1);
        let hits = Arc::new(Mutex::new(0));
        {
            let hits = Arc::clone(&hits);
            listeners.subscribe(move |_| *hits.lock().unwrap() += 1);
        }

        assert!(!store.mark_read(999));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn mark_all_read_publishes_single_bulk_change() {
        let (store, listeners) = new_store(10);
        for task_id in 1..=4 {
            push(&store, task_id);
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |change: &HistoryChange| {
                seen.lock().unwrap().push(change.clone())
            });
        }

        assert_eq!(store.mark_all_read(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![HistoryChange::Bulk]);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn recent_limits_without_reordering() {
        let (store, _) = new_store(10);
        for task_id in 1..=4 {
            push(&store, task_id);
        }
        let recent: Vec<_> = store
            .recent(2)
            .iter()
            .filter_map(Notification::task_id)
            .collect();
        assert_eq!(recent, vec![4, 3]);
    }

    #[test]
    fn subscriber_may_mutate_store_while_handling_a_change() {
        let (store, listeners) = new_store(10);
        let store = Arc::new(store);
        {
            let weak = Arc::downgrade(&store);
            listeners.subscribe(move |change: &HistoryChange| {
                let (Some(store), Some(notification)) = (weak.upgrade(), change.notification())
                else {
                    return;
                };
                if !notification.is_read() {
                    store.mark_read(notification.id());
                }
            });
        }

        let id = push(&store, 1);
        assert!(store.get(id).unwrap().is_read());
        assert_eq!(store.unread_count(), 0);
    }
}
