//! Progress broadcaster: non-blocking fan-out of orchestrator events.
//!
//! Built on `tokio::sync::broadcast`. Publishing never waits on a subscriber;
//! a subscriber that falls more than `capacity` events behind is told how many
//! it missed and should re-read the ledger to reconcile.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::{DownloadTask, TaskId, TaskStatus};

/// Transfer progress for one task, published after each committed checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    /// Bytes per second over the recent window.
    pub speed: f64,
    pub eta_secs: Option<f64>,
}

/// A committed status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub bytes_done: u64,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl From<&DownloadTask> for TaskEvent {
    fn from(task: &DownloadTask) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            bytes_done: task.bytes_done,
            retry_count: task.retry_count,
            last_error: task.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Progress(ProgressEvent),
    /// Queue processing was started or paused globally.
    Queue { running: bool },
    Task(TaskEvent),
}

impl Event {
    /// The task an event concerns; `None` for queue-wide events.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Progress(p) => Some(p.task_id),
            Event::Task(t) => Some(t.task_id),
            Event::Queue { .. } => None,
        }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    /// The subscriber lagged and this many events were dropped for it.
    Missed(u64),
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn publish_task(&self, task: &DownloadTask) {
        self.publish(Event::Task(TaskEvent::from(task)));
    }

    pub fn publish_progress(&self, progress: ProgressEvent) {
        self.publish(Event::Progress(progress));
    }

    pub fn publish_queue(&self, running: bool) {
        self.publish(Event::Queue { running });
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// One observer's view of the event stream. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Next delivery; `None` once every broadcaster handle is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Missed(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-waiting variant of [`recv`](Self::recv); `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Delivery::Missed(n)),
            Err(_) => None,
        }
    }
}
