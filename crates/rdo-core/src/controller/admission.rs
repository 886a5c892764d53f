//! Admission loop: claims queued tasks and runs their fetchers.
//!
//! Keeps up to `max_concurrent` fetchers in a `JoinSet` and never runs two
//! fetchers for one task; re-checks the queue
//! whenever a fetcher exits, a command wakes it, the earliest backoff
//! deadline passes, or the poll interval elapses.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::Shared;
use crate::control::{AbortToken, StopReason};
use crate::fetcher::Outcome;
use crate::ledger::{now_millis, DownloadTask, TaskId};

const MIN_IDLE_MS: i64 = 5;

/// Unregisters a fetcher's abort token however its task ends.
struct Registration {
    shared: Arc<Shared>,
    id: TaskId,
    token: Arc<AbortToken>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.control.unregister(self.id, &self.token);
    }
}

pub(super) async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut workers: JoinSet<(TaskId, Outcome)> = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        while workers.len() < shared.max_concurrent {
            // Held across the check and the claim so a global pause either
            // sees the claimed task as `Active` or stops the claim.
            let _gate = shared.admission.lock().await;
            if !shared.is_running() {
                break;
            }
            // A task whose previous fetcher is still winding down waits for it.
            let busy = shared.control.running();
            match shared.ledger.claim_next_queued_except(now_millis(), &busy).await {
                Ok(Some(task)) => spawn_worker(&shared, &mut workers, task),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "claiming next task failed");
                    break;
                }
            }
        }

        let idle = next_check(&shared, workers.len() < shared.max_concurrent).await;
        tokio::select! {
            Some(res) = workers.join_next(), if !workers.is_empty() => log_exit(res),
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(idle) => {}
            _ = shutdown.changed() => {}
        }
    }

    let stopping = shared.control.stop_all(StopReason::Shutdown);
    debug!(stopping, "admission loop draining");
    while let Some(res) = workers.join_next().await {
        log_exit(res);
    }
}

fn spawn_worker(shared: &Arc<Shared>, workers: &mut JoinSet<(TaskId, Outcome)>, task: DownloadTask) {
    let id = task.id;
    let token = shared.control.register(id);
    let registration = Registration {
        shared: Arc::clone(shared),
        id,
        token: Arc::clone(&token),
    };
    let fetcher = shared.fetcher.clone();
    workers.spawn(async move {
        let _registration = registration;
        let outcome = fetcher.run(task, token).await;
        (id, outcome)
    });
    debug!(task_id = id, running = workers.len(), "task admitted");
}

/// How long to idle: the poll interval, shortened to the next backoff
/// deadline while a slot is free.
async fn next_check(shared: &Shared, slot_free: bool) -> Duration {
    if !shared.is_running() || !slot_free {
        return shared.poll_interval;
    }
    match shared.ledger.earliest_retry_at().await {
        Ok(Some(at)) => {
            let wait = at.saturating_sub(now_millis()).max(MIN_IDLE_MS) as u64;
            shared.poll_interval.min(Duration::from_millis(wait))
        }
        Ok(None) => shared.poll_interval,
        Err(e) => {
            error!(error = %e, "reading backoff deadlines failed");
            shared.poll_interval
        }
    }
}

fn log_exit(res: Result<(TaskId, Outcome), tokio::task::JoinError>) {
    match res {
        Ok((id, outcome)) => debug!(task_id = id, ?outcome, "worker exited"),
        Err(e) => error!(error = %e, "worker panicked"),
    }
}
