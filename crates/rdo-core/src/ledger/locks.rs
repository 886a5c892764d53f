//! Per-record write locks.
//!
//! Every read-modify-write of a task holds that task's lock and nothing else,
//! so writers of unrelated tasks never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use super::types::TaskId;

#[derive(Default)]
pub(crate) struct RecordLocks {
    slots: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for one read-modify-write; drops the record's slot when nobody else
/// is waiting on it.
pub(crate) struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: TaskId,
    _guard: OwnedMutexGuard<()>,
}

impl RecordLocks {
    pub(crate) async fn acquire(&self, id: TaskId) -> RecordGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(id).or_default())
        };
        RecordGuard {
            locks: self,
            id,
            _guard: slot.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(|p| p.into_inner());
        // The map and this guard are the only references: no waiter.
        if slots.get(&self.id).is_some_and(|slot| Arc::strong_count(slot) == 2) {
            slots.remove(&self.id);
        }
    }
}
