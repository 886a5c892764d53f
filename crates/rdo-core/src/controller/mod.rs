//! Queue controller: owns the task state machine and admission.
//!
//! Commands write the new status through the ledger's guarded update first
//! and only then signal a running fetcher, so a refused command never leaves
//! a transfer half-stopped. Admission runs in a background loop
//! ([`admission`]) that keeps at most `max_concurrent` fetchers alive.

mod admission;
pub mod commands;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::{PartialFilePolicy, RdoConfig};
use crate::control::{JobControl, StopReason};
use crate::error::RdoResult;
use crate::fetcher::{discard_partial, FetchSettings, Fetcher, LiveStats};
use crate::ledger::{
    DownloadTask, Ledger, Submission, SubmitReport, SubmitRules, TaskId, TaskStatus,
};

/// A task as listed, with the live rate of a running transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: DownloadTask,
    pub speed: Option<f64>,
    pub eta_secs: Option<f64>,
}

pub(crate) struct Shared {
    ledger: Ledger,
    rules: SubmitRules,
    events: Broadcaster,
    control: JobControl,
    live: LiveStats,
    fetcher: Fetcher,
    max_concurrent: usize,
    poll_interval: Duration,
    cancel_partial: PartialFilePolicy,
    running: AtomicBool,
    /// Orders claims against a global pause.
    admission: tokio::sync::Mutex<()>,
    wake: Notify,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn wake(&self) {
        self.wake.notify_one();
    }
}

/// Handle to a launched orchestrator. Cheap to share behind an `Arc`.
pub struct Controller {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Recover stranded tasks and start the admission loop.
    ///
    /// The queue starts stopped; call [`start`](Self::start) to admit tasks.
    pub async fn launch(ledger: Ledger, config: &RdoConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let rules = SubmitRules::from_config(config)?;
        let events = Broadcaster::new(config.event_capacity);
        let ledger = ledger.with_events(events.clone());

        let recovered = ledger.recover_active().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "re-queued tasks left active by a previous run");
        }

        let live = LiveStats::default();
        let fetcher = Fetcher::new(
            ledger.clone(),
            events.clone(),
            live.clone(),
            FetchSettings::from_config(config),
        );
        let shared = Arc::new(Shared {
            ledger,
            rules,
            events,
            control: JobControl::new(),
            live,
            fetcher,
            max_concurrent: config.max_concurrent.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            cancel_partial: config.cancel_partial,
            running: AtomicBool::new(false),
            admission: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(admission::supervise(Arc::clone(&shared), shutdown_rx));
        info!(max_concurrent = shared.max_concurrent, "orchestrator launched");

        Ok(Self {
            shared,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Stop admission, return in-flight tasks to `Queued` at their last
    /// checkpoint, and wait for every fetcher to exit.
    pub async fn shutdown(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        self.shared.running.store(false, Ordering::Release);
        let _ = self.shutdown.send(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "admission loop ended abnormally");
        }
        info!("orchestrator stopped");
    }

    pub async fn submit(&self, urls: &[String]) -> RdoResult<SubmitReport> {
        let report = self.shared.ledger.create(&self.shared.rules, urls).await?;
        self.shared.wake();
        Ok(report)
    }

    pub async fn submit_with(&self, submissions: &[Submission]) -> RdoResult<SubmitReport> {
        let report = self
            .shared
            .ledger
            .create_with(&self.shared.rules, submissions)
            .await?;
        self.shared.wake();
        Ok(report)
    }

    /// Begin (or continue) admitting queued tasks.
    pub fn start(&self) {
        self.set_running(true);
    }

    /// Stop admission and pause every `Active` task at its next chunk boundary.
    pub async fn pause_all(&self) -> RdoResult<Vec<TaskId>> {
        {
            // Wait out a claim in progress; none start after this.
            let _gate = self.shared.admission.lock().await;
            self.set_running(false);
        }
        let mut paused = Vec::new();
        for task in self.shared.ledger.list_by_status(TaskStatus::Active).await? {
            match self.pause(task.id).await {
                Ok(_) => paused.push(task.id),
                // Finished or failed on its own in the meantime.
                Err(e) if e.refused_status().is_some() => {}
                Err(e) => return Err(e),
            }
        }
        info!(count = paused.len(), "paused all");
        Ok(paused)
    }

    /// Re-queue every `Paused` task and resume admission.
    pub async fn resume_all(&self) -> RdoResult<Vec<TaskId>> {
        let mut resumed = Vec::new();
        for task in self.shared.ledger.list_by_status(TaskStatus::Paused).await? {
            match commands::resume(&self.shared.ledger, task.id).await {
                Ok(_) => resumed.push(task.id),
                Err(e) if e.refused_status().is_some() => {}
                Err(e) => return Err(e),
            }
        }
        self.set_running(true);
        info!(count = resumed.len(), "resumed all");
        Ok(resumed)
    }

    /// `Active → Paused`; the fetcher stops at its next chunk boundary.
    pub async fn pause(&self, id: TaskId) -> RdoResult<DownloadTask> {
        let task = self
            .shared
            .ledger
            .update(id, |t| t.move_to(TaskStatus::Paused, "pause"))
            .await?;
        self.shared.control.request_stop(id, StopReason::Pause);
        debug!(task_id = id, "pause requested");
        Ok(task)
    }

    /// `Paused → Queued`.
    pub async fn resume(&self, id: TaskId) -> RdoResult<DownloadTask> {
        let task = commands::resume(&self.shared.ledger, id).await?;
        self.shared.wake();
        Ok(task)
    }

    /// Cancel from any non-terminal status.
    ///
    /// A running fetcher is stopped and handles the partial file itself;
    /// otherwise the partial file is handled here per `cancel_partial`.
    pub async fn cancel(&self, id: TaskId) -> RdoResult<DownloadTask> {
        let (task, previous) = commands::mark_cancelled(&self.shared.ledger, id).await?;
        let signalled = previous == TaskStatus::Active
            && self.shared.control.request_stop(id, StopReason::Cancel);
        if !signalled {
            discard_partial(id, &task.destination, self.shared.cancel_partial).await;
        }
        info!(task_id = id, from = %previous, "task cancelled");
        Ok(task)
    }

    /// `Failed → Queued` with a fresh retry budget.
    pub async fn retry(&self, id: TaskId, fallback: bool) -> RdoResult<DownloadTask> {
        let task = commands::retry(&self.shared.ledger, id, fallback).await?;
        self.shared.wake();
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> RdoResult<DownloadTask> {
        self.shared.ledger.get(id).await
    }

    /// All tasks, running ones annotated with their current speed and ETA.
    pub async fn list(&self) -> RdoResult<Vec<TaskView>> {
        let tasks = self.shared.ledger.list().await?;
        Ok(tasks
            .into_iter()
            .map(|task| {
                let rate = (task.status == TaskStatus::Active)
                    .then(|| self.shared.live.get(task.id))
                    .flatten();
                TaskView {
                    speed: rate.map(|r| r.speed),
                    eta_secs: rate.and_then(|r| r.eta_secs),
                    task,
                }
            })
            .collect())
    }

    pub async fn list_failed(&self) -> RdoResult<Vec<DownloadTask>> {
        self.shared.ledger.list_failed().await
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Tasks with a live fetcher right now.
    pub fn in_flight(&self) -> Vec<TaskId> {
        self.shared.control.running()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.shared.ledger
    }

    fn set_running(&self, running: bool) {
        let was = self.shared.running.swap(running, Ordering::AcqRel);
        if was != running {
            self.shared.events.publish_queue(running);
            info!(running, "queue processing toggled");
        }
        self.shared.wake();
    }
}

#[cfg(test)]
mod tests;
