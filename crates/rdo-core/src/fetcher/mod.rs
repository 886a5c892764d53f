//! Chunked fetcher: drives one task from its checkpoint to completion.
//!
//! Body bytes are buffered into chunks of `chunk_size`. Each full chunk is
//! written at the checkpoint offset of `<destination>.part`, synced, and only
//! then recorded as the new `bytes_done` (which requires the task to still be
//! `Active`). A progress event follows every committed checkpoint.
//!
//! Stop requests are honoured between chunks and while waiting on the network.
//! Bytes already received when a pause or shutdown lands are written and
//! checkpointed before the fetcher exits; a cancel drops them.
//!
//! Every ledger write is tied to the claim generation (`attempt`) the fetcher
//! was started under, so a fetcher that outlives its claim changes nothing.

mod head;
mod speed;
mod transfer;

pub use speed::{LiveRate, LiveStats, SpeedMeter};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, ProgressEvent};
use crate::config::{DuplicateContentPolicy, PartialFilePolicy, RdoConfig};
use crate::control::{AbortToken, StopReason};
use crate::error::RdoResult;
use crate::ledger::{now_millis, DownloadTask, Ledger, TaskId, TaskStatus};
use crate::retry::{classify, RetryDecision, RetryPolicy, TransferError};
use crate::storage::{self, PartFile};
use head::ResponseHead;
use transfer::{CurlStream, Frame, TransferOptions};

/// Fetcher knobs, taken from `RdoConfig`.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub stall_timeout: Duration,
    pub speed_window: Duration,
    pub retry: RetryPolicy,
    pub cancel_partial: PartialFilePolicy,
    pub duplicate_content: DuplicateContentPolicy,
}

impl FetchSettings {
    pub fn from_config(cfg: &RdoConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            stall_timeout: Duration::from_secs(cfg.stall_timeout_secs),
            speed_window: Duration::from_secs(cfg.speed_window_secs),
            retry: cfg.retry_policy(),
            cancel_partial: cfg.cancel_partial,
            duplicate_content: cfg.duplicate_content,
        }
    }

    fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            connect_timeout: self.connect_timeout,
            stall_timeout: self.stall_timeout,
        }
    }
}

/// How a fetch ended, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    /// Transient failure; eligible again after the delay.
    Requeued(Duration),
    Failed,
    Stopped(StopReason),
    /// The outcome could not be recorded (ledger unavailable).
    Lost,
}

/// Why the streaming loop left early.
enum Halt {
    Stop(StopReason),
    Fail(TransferError),
}

impl From<TransferError> for Halt {
    fn from(e: TransferError) -> Self {
        Halt::Fail(e)
    }
}

impl From<std::io::Error> for Halt {
    fn from(e: std::io::Error) -> Self {
        Halt::Fail(TransferError::Storage(e))
    }
}

#[derive(Clone)]
pub struct Fetcher {
    ledger: Ledger,
    events: Broadcaster,
    live: LiveStats,
    settings: Arc<FetchSettings>,
}

/// Mutable state of one attempt.
struct Attempt<'a> {
    task: &'a DownloadTask,
    token: &'a AbortToken,
    part: PartFile,
    done: u64,
    total: Option<u64>,
    meter: SpeedMeter,
}

impl Fetcher {
    pub fn new(ledger: Ledger, events: Broadcaster, live: LiveStats, settings: FetchSettings) -> Self {
        Self {
            ledger,
            events,
            live,
            settings: Arc::new(settings),
        }
    }

    /// Run one attempt for a task the caller has already moved to `Active`,
    /// and record how it ended. Never returns an error: failures end up in
    /// the task's status and `last_error`.
    pub async fn run(&self, task: DownloadTask, token: Arc<AbortToken>) -> Outcome {
        let id = task.id;
        info!(task_id = id, url = %task.url, offset = task.bytes_done, "fetch started");
        let result = self.attempt(&task, &token).await;
        self.live.remove(id);

        let outcome = match result {
            Ok(()) => Outcome::Completed,
            Err(Halt::Stop(reason)) => self.on_stop(&task, reason).await,
            Err(Halt::Fail(e)) => self.on_failure(&task, &token, e).await,
        };
        debug!(task_id = id, ?outcome, "fetch finished");
        outcome
    }

    async fn attempt(&self, task: &DownloadTask, token: &AbortToken) -> Result<(), Halt> {
        let dest = task.destination.clone();
        let checkpoint = task.bytes_done;
        let (part, resume_at) = blocking(move || PartFile::open_resume(&dest, checkpoint)).await?;

        let mut at = Attempt {
            task,
            token,
            part,
            done: resume_at,
            total: task.bytes_total,
            meter: SpeedMeter::new(self.settings.speed_window),
        };

        if resume_at < checkpoint {
            warn!(
                task_id = task.id,
                checkpoint,
                on_disk = resume_at,
                "part file shorter than checkpoint, resuming from on-disk length"
            );
            self.persist(&at, |t| {
                t.bytes_done = resume_at;
                Ok(())
            })
            .await?;
        }

        if at.total.is_some_and(|total| at.done >= total) {
            return self.complete(at).await;
        }

        let mut stream = CurlStream::open(&task.url, at.done, self.settings.transfer_options());
        let head = match self.next_frame(&mut stream, token).await? {
            Some(Frame::Head(head)) => head,
            Some(Frame::Data(_)) | None => {
                stream.finish().await?;
                return Err(Halt::Fail(TransferError::PartialTransfer {
                    expected: at.total.unwrap_or(0),
                    received: at.done,
                }));
            }
        };

        let skip = match self.accept_head(&mut at, &head).await? {
            Accepted::Stream { skip } => skip,
            Accepted::AlreadyComplete => {
                drop(stream);
                return self.complete(at).await;
            }
        };
        at.meter.record(at.done);

        let mut buf: Vec<u8> = Vec::with_capacity(self.settings.chunk_size);
        let streamed = self.stream_body(&mut at, &mut stream, &mut buf, skip).await;
        if let Err(Halt::Stop(reason)) = &streamed {
            self.checkpoint_on_stop(&mut at, *reason, buf).await;
        }
        streamed?;
        stream.finish().await?;

        match at.total {
            Some(total) if at.done < total => Err(Halt::Fail(TransferError::PartialTransfer {
                expected: total,
                received: at.done,
            })),
            _ => self.complete(at).await,
        }
    }

    /// Buffer body frames and commit them a chunk at a time. On return `buf`
    /// holds whatever was received but not yet committed.
    async fn stream_body(
        &self,
        at: &mut Attempt<'_>,
        stream: &mut CurlStream,
        buf: &mut Vec<u8>,
        mut skip: u64,
    ) -> Result<(), Halt> {
        let chunk_size = self.settings.chunk_size;
        while let Some(frame) = self.next_frame(stream, at.token).await? {
            let Frame::Data(mut bytes) = frame else { continue };
            if skip > 0 {
                let n = skip.min(bytes.len() as u64) as usize;
                bytes.drain(..n);
                skip -= n as u64;
            }
            if let Some(total) = at.total {
                let received = at.done + (buf.len() + bytes.len()) as u64;
                if received > total {
                    return Err(Halt::Fail(TransferError::Overflow { expected: total, received }));
                }
            }
            buf.extend_from_slice(&bytes);
            while buf.len() >= chunk_size {
                self.commit(at, buf[..chunk_size].to_vec()).await?;
                buf.drain(..chunk_size);
                if let Some(reason) = at.token.reason() {
                    return Err(Halt::Stop(reason));
                }
            }
        }

        // Keep whatever arrived intact before reporting how the body ended.
        if !buf.is_empty() {
            self.commit(at, buf.clone()).await?;
            buf.clear();
        }
        Ok(())
    }

    /// Next frame from curl, or a stop if the token trips first.
    async fn next_frame(&self, stream: &mut CurlStream, token: &AbortToken) -> Result<Option<Frame>, Halt> {
        tokio::select! {
            biased;
            reason = token.tripped() => Err(Halt::Stop(reason)),
            frame = stream.next() => Ok(frame),
        }
    }

    async fn accept_head(&self, at: &mut Attempt<'_>, head: &ResponseHead) -> Result<Accepted, Halt> {
        let reported = head.full_size();
        let skip = match head.status {
            206 => match head.range_start {
                Some(start) if start <= at.done => at.done - start,
                Some(_) => {
                    return Err(Halt::Fail(TransferError::RangeNotSatisfiable { offset: at.done }))
                }
                None => 0,
            },
            200 => {
                if at.done > 0 {
                    debug!(task_id = at.task.id, offset = at.done, "server ignored range, skipping prefix");
                }
                at.done
            }
            416 => {
                let complete = at.total.or(reported) == Some(at.done);
                if complete {
                    return Ok(Accepted::AlreadyComplete);
                }
                return Err(Halt::Fail(TransferError::RangeNotSatisfiable { offset: at.done }));
            }
            code => return Err(Halt::Fail(TransferError::Http(code))),
        };

        if let Some(size) = reported {
            match at.total {
                Some(recorded) if recorded != size => {
                    return Err(Halt::Fail(TransferError::SizeChanged { recorded, reported: size }));
                }
                None if at.done > size => {
                    return Err(Halt::Fail(TransferError::SizeChanged { recorded: at.done, reported: size }));
                }
                None => {
                    at.total = Some(size);
                    self.persist(at, |t| {
                        t.bytes_total = Some(size);
                        Ok(())
                    })
                    .await?;
                    debug!(task_id = at.task.id, total = size, "learned remote size");
                }
                Some(_) => {}
            }
        }
        Ok(Accepted::Stream { skip })
    }

    /// Write, sync, then record one chunk as the new checkpoint.
    async fn commit(&self, at: &mut Attempt<'_>, chunk: Vec<u8>) -> Result<(), Halt> {
        let offset = at.done;
        let len = chunk.len() as u64;
        let part = at.part.clone();
        blocking(move || {
            part.write_at(offset, &chunk)?;
            part.sync()
        })
        .await?;

        let bytes_done = offset + len;
        self.persist(at, |t| {
            t.bytes_done = bytes_done;
            t.last_error = None;
            Ok(())
        })
        .await?;
        at.done = bytes_done;

        at.meter.record(bytes_done);
        let speed = at.meter.bytes_per_sec();
        let eta_secs = at.meter.eta_secs(bytes_done, at.total);
        self.live.set(at.task.id, LiveRate { speed, eta_secs });
        self.events.publish_progress(ProgressEvent {
            task_id: at.task.id,
            bytes_done,
            bytes_total: at.total,
            speed,
            eta_secs,
        });
        Ok(())
    }

    /// Record bytes received before a pause or shutdown so a resume does not
    /// fetch them again. Best effort: a refusal or error only costs a re-fetch.
    async fn checkpoint_on_stop(&self, at: &mut Attempt<'_>, reason: StopReason, pending: Vec<u8>) {
        if reason == StopReason::Cancel || pending.is_empty() {
            return;
        }
        let id = at.task.id;
        let attempt = at.task.attempt;
        let offset = at.done;
        let bytes_done = offset + pending.len() as u64;

        let part = at.part.clone();
        if let Err(e) = blocking(move || {
            part.write_at(offset, &pending)?;
            part.sync()
        })
        .await
        {
            warn!(task_id = id, error = %e, "could not save bytes received before stop");
            return;
        }

        let res = self
            .ledger
            .update(id, |t| {
                // Only this claim's record, not yet moved on by anyone else.
                let ours = t.attempt == attempt
                    && t.bytes_done == offset
                    && matches!(t.status, TaskStatus::Active | TaskStatus::Paused | TaskStatus::Queued);
                if ours {
                    t.bytes_done = bytes_done;
                }
                Ok(())
            })
            .await;
        match res {
            Ok(t) if t.bytes_done == bytes_done => {
                at.done = bytes_done;
                debug!(task_id = id, bytes_done, "checkpointed partial chunk on stop");
                self.events.publish_progress(ProgressEvent {
                    task_id: id,
                    bytes_done,
                    bytes_total: at.total,
                    speed: 0.0,
                    eta_secs: None,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(task_id = id, error = %e, "could not checkpoint on stop"),
        }
    }

    /// Guarded write: only lands while the task is still `Active` under this
    /// fetcher's claim.
    async fn persist<F>(&self, at: &Attempt<'_>, mutate: F) -> Result<DownloadTask, Halt>
    where
        F: FnOnce(&mut DownloadTask) -> RdoResult<()>,
    {
        let res = self
            .ledger
            .update(at.task.id, |t| {
                t.require_claim(at.task.attempt, "checkpoint")?;
                mutate(t)
            })
            .await;
        res.map_err(|e| match e.refused_status() {
            Some(status) => Halt::Stop(stop_reason(at.token, status)),
            None => Halt::Fail(TransferError::Ledger(e)),
        })
    }

    /// Checksum, rename over the destination, then mark `Completed`.
    ///
    /// Content matching an earlier completed task from another URL is marked
    /// `duplicate_of` it; under [`DuplicateContentPolicy::Remove`] the redundant
    /// bytes are dropped instead of published.
    async fn complete(&self, at: Attempt<'_>) -> Result<(), Halt> {
        let task = at.task;
        let part = at.part.clone();
        let sha = blocking(move || {
            part.sync()?;
            storage::sha256_hex(part.path())
        })
        .await?;

        let original = match self.ledger.completed_by_sha256(&sha, &task.url).await {
            Ok(found) => found.map(|t| t.id),
            Err(e) => return Err(Halt::Fail(TransferError::Ledger(e))),
        };
        let publish = original.is_none() || self.settings.duplicate_content == DuplicateContentPolicy::Keep;
        if publish {
            let dest = task.destination.clone();
            let part = at.part.clone();
            blocking(move || part.finalize(&dest)).await?;
        }

        let done = at.done;
        let res = self
            .ledger
            .update(task.id, |t| {
                t.require_claim(task.attempt, "complete")?;
                t.bytes_done = done;
                t.bytes_total = Some(done);
                t.sha256 = Some(sha.clone());
                t.duplicate_of = original;
                t.last_error = None;
                t.next_attempt_at = None;
                t.move_to(TaskStatus::Completed, "complete")
            })
            .await;

        match res {
            Ok(_) => {
                match original {
                    Some(of) if !publish => {
                        let part = at.part.clone();
                        if let Err(e) = blocking(move || std::fs::remove_file(part.path())).await {
                            warn!(task_id = task.id, error = %e, "could not remove duplicate content");
                        }
                        info!(task_id = task.id, duplicate_of = of, sha256 = %sha, "duplicate content removed");
                    }
                    Some(of) => {
                        info!(task_id = task.id, duplicate_of = of, bytes = done, sha256 = %sha, "download completed (duplicate content)");
                    }
                    None => info!(task_id = task.id, bytes = done, sha256 = %sha, "download completed"),
                }
                Ok(())
            }
            Err(e) => {
                // Stopped or failed underneath: the file is not the task's to publish.
                if publish {
                    let dest = task.destination.clone();
                    let back = storage::temp_path(&dest);
                    blocking(move || std::fs::rename(&dest, &back)).await?;
                }
                match e.refused_status() {
                    Some(status) => Err(Halt::Stop(stop_reason(at.token, status))),
                    None => Err(Halt::Fail(TransferError::Ledger(e))),
                }
            }
        }
    }

    async fn on_stop(&self, task: &DownloadTask, reason: StopReason) -> Outcome {
        let id = task.id;
        let next = match reason {
            StopReason::Pause => TaskStatus::Paused,
            StopReason::Shutdown => TaskStatus::Queued,
            StopReason::Cancel => TaskStatus::Cancelled,
        };
        let res = self.settle(task, next).await;
        if let Err(e) = res {
            error!(task_id = id, error = %e, "failed to record stop");
            return Outcome::Lost;
        }
        if reason == StopReason::Cancel {
            discard_partial(task.id, &task.destination, self.settings.cancel_partial).await;
        }
        info!(task_id = id, ?reason, "fetch stopped");
        Outcome::Stopped(reason)
    }

    /// Move the task to `next` if it is still `Active` under this claim;
    /// leave it alone if the controller (or a newer claim) already moved it.
    async fn settle(&self, task: &DownloadTask, next: TaskStatus) -> RdoResult<()> {
        self.ledger
            .update(task.id, |t| {
                if t.status == TaskStatus::Active && t.attempt == task.attempt {
                    t.move_to(next, "stop")?;
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn on_failure(&self, task: &DownloadTask, token: &AbortToken, err: TransferError) -> Outcome {
        let kind = classify(&err);
        let message = err.to_string();
        let policy = self.settings.retry;
        let now = now_millis();
        let mut decision = RetryDecision::GiveUp;

        let res = self
            .ledger
            .update(task.id, |t| {
                t.require_claim(task.attempt, "fail")?;
                t.last_error = Some(message.clone());
                if kind.is_transient() {
                    t.retry_count = t.retry_count.saturating_add(1);
                }
                decision = policy.decide(t.retry_count, kind);
                match decision {
                    RetryDecision::RetryAfter(delay) => {
                        t.next_attempt_at = Some(now.saturating_add(delay.as_millis() as i64));
                        t.move_to(TaskStatus::Queued, "requeue")
                    }
                    RetryDecision::GiveUp => t.move_to(TaskStatus::Failed, "fail"),
                }
            })
            .await;

        match res {
            Ok(t) => match decision {
                RetryDecision::RetryAfter(delay) => {
                    warn!(task_id = t.id, retry_count = t.retry_count, ?delay, error = %message, "transient failure, re-queued");
                    Outcome::Requeued(delay)
                }
                RetryDecision::GiveUp => {
                    warn!(task_id = t.id, retry_count = t.retry_count, error = %message, "download failed");
                    Outcome::Failed
                }
            },
            Err(e) => match e.refused_status() {
                Some(status) => self.on_stop(task, stop_reason(token, status)).await,
                None => {
                    error!(task_id = task.id, error = %e, "failed to record failure");
                    Outcome::Lost
                }
            },
        }
    }
}

enum Accepted {
    Stream { skip: u64 },
    AlreadyComplete,
}

/// The stop a refused guarded write implies: the token's reason if it was
/// tripped, else whatever the record was moved to.
fn stop_reason(token: &AbortToken, status: TaskStatus) -> StopReason {
    token.reason().unwrap_or(match status {
        TaskStatus::Cancelled => StopReason::Cancel,
        TaskStatus::Paused => StopReason::Pause,
        _ => StopReason::Shutdown,
    })
}

/// Apply the partial-file policy of a cancelled task.
pub(crate) async fn discard_partial(id: TaskId, destination: &Path, policy: PartialFilePolicy) {
    if policy == PartialFilePolicy::Retain {
        return;
    }
    let dest = destination.to_path_buf();
    match blocking(move || storage::remove_partial(&dest)).await {
        Ok(true) => debug!(task_id = id, "removed partial file"),
        Ok(false) => {}
        Err(e) => warn!(task_id = id, error = %e, "could not remove partial file"),
    }
}

async fn blocking<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}
