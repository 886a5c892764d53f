//! Stop signals for running transfers.
//!
//! Each `Active` task's fetcher holds an [`AbortToken`] registered in
//! [`JobControl`]. The controller records the new status in the ledger first,
//! then trips the token; the fetcher notices at its next chunk boundary (or
//! while waiting for network data), checkpoints what it already holds and
//! stops.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

use crate::ledger::TaskId;

/// Why a running transfer was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Cancel,
    /// Orchestrator is shutting down; the task goes back to `Queued`.
    Shutdown,
}

impl StopReason {
    fn to_u8(self) -> u8 {
        match self {
            StopReason::Pause => 1,
            StopReason::Cancel => 2,
            StopReason::Shutdown => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(StopReason::Pause),
            2 => Some(StopReason::Cancel),
            3 => Some(StopReason::Shutdown),
            _ => None,
        }
    }
}

/// Per-transfer stop flag with a wakeup for the waiting fetcher.
#[derive(Default)]
pub struct AbortToken {
    reason: AtomicU8,
    notify: Notify,
}

impl AbortToken {
    /// Request a stop. The first reason wins; later requests only re-wake.
    pub fn trip(&self, reason: StopReason) {
        let _ = self
            .reason
            .compare_exchange(0, reason.to_u8(), Ordering::AcqRel, Ordering::Acquire);
        self.notify.notify_one();
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    /// Resolves once a stop has been requested.
    pub async fn tripped(&self) -> StopReason {
        loop {
            if let Some(r) = self.reason() {
                return r;
            }
            self.notify.notified().await;
        }
    }
}

/// Registry of task id -> abort token for every running transfer.
#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<TaskId, Arc<AbortToken>>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer that is about to start; returns its token.
    pub fn register(&self, id: TaskId) -> Arc<AbortToken> {
        let token = Arc::new(AbortToken::default());
        self.jobs
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, Arc::clone(&token));
        token
    }

    /// Unregister a transfer once its worker has finished.
    ///
    /// Only removes `token` itself: a newer registration for the same id
    /// stays in place.
    pub fn unregister(&self, id: TaskId, token: &Arc<AbortToken>) {
        let mut jobs = self.jobs.write().unwrap_or_else(|p| p.into_inner());
        if jobs.get(&id).is_some_and(|current| Arc::ptr_eq(current, token)) {
            jobs.remove(&id);
        }
    }

    /// Trip the token of a running transfer. Returns false if `id` is not running.
    pub fn request_stop(&self, id: TaskId, reason: StopReason) -> bool {
        match self.jobs.read().unwrap_or_else(|p| p.into_inner()).get(&id) {
            Some(token) => {
                token.trip(reason);
                true
            }
            None => false,
        }
    }

    /// Trip every running transfer's token.
    pub fn stop_all(&self, reason: StopReason) -> usize {
        let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        for token in jobs.values() {
            token.trip(reason);
        }
        jobs.len()
    }

    pub fn running(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Default path for the control socket (same XDG state dir as the ledger).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_reason_wins() {
        let t = AbortToken::default();
        assert_eq!(t.reason(), None);
        t.trip(StopReason::Pause);
        t.trip(StopReason::Cancel);
        assert_eq!(t.reason(), Some(StopReason::Pause));
    }

    #[tokio::test]
    async fn tripped_wakes_waiter() {
        let t = Arc::new(AbortToken::default());
        let t2 = Arc::clone(&t);
        let waiter = tokio::spawn(async move { t2.tripped().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.trip(StopReason::Cancel);
        assert_eq!(waiter.await.unwrap(), StopReason::Cancel);
    }

    #[tokio::test]
    async fn tripped_before_wait_returns_immediately() {
        let t = AbortToken::default();
        t.trip(StopReason::Shutdown);
        assert_eq!(t.tripped().await, StopReason::Shutdown);
    }

    #[test]
    fn registry_routes_stops() {
        let c = JobControl::new();
        let a = c.register(1);
        let b = c.register(2);
        assert!(c.request_stop(1, StopReason::Pause));
        assert!(!c.request_stop(3, StopReason::Pause));
        assert_eq!(a.reason(), Some(StopReason::Pause));
        assert_eq!(b.reason(), None);

        assert_eq!(c.stop_all(StopReason::Shutdown), 2);
        assert_eq!(b.reason(), Some(StopReason::Shutdown));
        assert_eq!(c.running(), vec![1, 2]);
        c.unregister(1, &a);
        assert_eq!(c.running(), vec![2]);
    }

    #[test]
    fn stale_unregister_keeps_newer_token() {
        let c = JobControl::new();
        let old = c.register(4);
        let new = c.register(4);

        c.unregister(4, &old);
        assert_eq!(c.running(), vec![4]);
        assert!(c.request_stop(4, StopReason::Pause));
        assert_eq!(new.reason(), Some(StopReason::Pause));
        assert_eq!(old.reason(), None);

        c.unregister(4, &new);
        assert!(c.running().is_empty());
    }
}
