//! Tracker of task ids that already produced a notification.
//!
//! # Responsibility
//! - Answer whether a task was already notified.
//! - Bound growth by evicting the oldest insertions in bulk.
//! - Persist the set independently of the history.
//!
//! # Invariants
//! - Ids are kept in insertion order; eviction drops the oldest first.
//! - When the set grows past `capacity` it is cut back to the `retain`
//!   most recently inserted ids.
//! - There is no per-id removal.

use crate::model::notification::TaskId;
use crate::persist::{PersistenceGateway, PersistenceResult};
use indexmap::IndexSet;
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default size above which eviction kicks in.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;
/// Default number of ids kept by an eviction.
pub const DEFAULT_DEDUP_RETAIN: usize = 500;

pub struct DedupTracker {
    capacity: usize,
    retain: usize,
    task_ids: Mutex<IndexSet<TaskId>>,
    persist_lock: Mutex<()>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl DedupTracker {
    /// Creates an empty tracker. `retain` is clamped to `capacity`.
    pub fn new(capacity: usize, retain: usize, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            capacity,
            retain: retain.min(capacity),
            task_ids: Mutex::new(IndexSet::new()),
            persist_lock: Mutex::new(()),
            gateway,
        }
    }

    /// Creates a tracker seeded from the gateway.
    ///
    /// A failed load is logged and the tracker starts empty. An oversized
    /// loaded set is cut back immediately, in memory only; the next mutation
    /// persists the trimmed state.
    pub fn load(capacity: usize, retain: usize, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let tracker = Self::new(capacity, retain, gateway);
        match tracker.gateway.load_notified() {
            Ok(loaded) => {
                let mut task_ids = tracker.task_ids();
                task_ids.extend(loaded);
                let evicted = evict_oldest(&mut task_ids, tracker.capacity, tracker.retain);
                info!(
                    "event=dedup_load module=store status=ok size={} evicted={}",
                    task_ids.len(),
                    evicted
                );
            }
            Err(err) => error!(
                "event=dedup_load module=store status=error error_code={} error={}",
                err.code(),
                err
            ),
        }
        tracker
    }

    pub fn has_been_notified(&self, task_id: TaskId) -> bool {
        self.task_ids().contains(&task_id)
    }

    /// Records `task_id` as notified and persists the set.
    ///
    /// Returns `true` if the id was newly recorded. The check and the insert
    /// happen under one lock, so exactly one of several concurrent callers
    /// for the same id gets `true`. Re-marking an id is a no-op and does not
    /// touch storage.
    pub fn mark_as_notified(&self, task_id: TaskId) -> bool {
        let persist_guard = self.persist_lock();
        let snapshot = {
            let mut task_ids = self.task_ids();
            if !task_ids.insert(task_id) {
                return false;
            }
            evict_oldest(&mut task_ids, self.capacity, self.retain);
            snapshot_of(&task_ids)
        };
        self.persist(&snapshot, "mark");
        drop(persist_guard);
        true
    }

    /// Applies the eviction policy. Returns the number of evicted ids.
    pub fn cleanup(&self) -> usize {
        let persist_guard = self.persist_lock();
        let (evicted, snapshot) = {
            let mut task_ids = self.task_ids();
            let evicted = evict_oldest(&mut task_ids, self.capacity, self.retain);
            (evicted, snapshot_of(&task_ids))
        };
        if evicted > 0 {
            self.persist(&snapshot, "cleanup");
        }
        drop(persist_guard);
        evicted
    }

    pub fn len(&self) -> usize {
        self.task_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids().is_empty()
    }

    /// Insertion-ordered copy of the tracked ids, oldest first.
    pub fn task_ids_snapshot(&self) -> Vec<TaskId> {
        snapshot_of(&self.task_ids())
    }

    /// Saves the current set, returning the gateway error if any.
    pub fn flush(&self) -> PersistenceResult<()> {
        let _persist_guard = self.persist_lock();
        let snapshot = self.task_ids_snapshot();
        self.gateway.save_notified(&snapshot)
    }

    fn persist(&self, snapshot: &[TaskId], operation: &'static str) {
        if let Err(err) = self.gateway.save_notified(snapshot) {
            warn!(
                "event=dedup_save module=store status=error operation={} size={} error_code={} error={}",
                operation,
                snapshot.len(),
                err.code(),
                err
            );
        }
    }

    fn task_ids(&self) -> MutexGuard<'_, IndexSet<TaskId>> {
        self.task_ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_lock(&self) -> MutexGuard<'_, ()> {
        self.persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn evict_oldest(task_ids: &mut IndexSet<TaskId>, capacity: usize, retain: usize) -> usize {
    if task_ids.len() <= capacity {
        return 0;
    }
    let evicted = task_ids.len() - retain;
    task_ids.drain(..evicted);
    info!(
        "event=dedup_evict module=store status=ok evicted={} remaining={}",
        evicted,
        task_ids.len()
    );
    evicted
}

fn snapshot_of(task_ids: &IndexSet<TaskId>) -> Vec<TaskId> {
    task_ids.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::DedupTracker;
    use crate::persist::{PersistenceGateway, SqliteGateway};
    use std::sync::Arc;

    fn gateway() -> Arc<dyn PersistenceGateway> {
        Arc::new(SqliteGateway::open_in_memory().unwrap())
    }

    #[test]
    fn mark_is_idempotent() {
        let tracker = DedupTracker::new(10, 5, gateway());
        assert!(tracker.mark_as_notified(3));
        assert!(!tracker.mark_as_notified(3));
        assert!(tracker.has_been_notified(3));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn small_capacity_evicts_oldest_insertions() {
        let tracker = DedupTracker::new(4, 2, gateway());
        for task_id in [40, 10, 30, 20, 50] {
            tracker.mark_as_notified(task_id);
        }
        assert_eq!(tracker.task_ids_snapshot(), vec![20, 50]);
        assert!(!tracker.has_been_notified(40));
    }

    #[test]
    fn cleanup_below_capacity_is_noop() {
        let tracker = DedupTracker::new(4, 2, gateway());
        tracker.mark_as_notified(1);
        assert_eq!(tracker.cleanup(), 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn load_trims_oversized_set() {
        let gateway = gateway();
        gateway.save_notified(&[1, 2, 3, 4, 5, 6]).unwrap();
        let tracker = DedupTracker::load(4, 2, gateway);
        assert_eq!(tracker.task_ids_snapshot(), vec![5, 6]);
    }
}
