//! Task write operations: submission, guarded update, recovery and admission.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::super::db::{now_millis, Ledger};
use super::super::types::{
    DownloadTask, Rejection, Submission, SubmitReport, TaskId, TaskStatus,
};
use crate::config::{DuplicatePolicy, RdoConfig};
use crate::error::{RdoError, RdoResult};
use crate::url_model::{resolve_destination, unique_destination, validate_url};

/// Admission rules for new submissions.
#[derive(Debug, Clone)]
pub struct SubmitRules {
    /// Every destination resolves strictly inside this directory.
    pub root: PathBuf,
    pub allowed_schemes: Vec<String>,
    pub duplicates: DuplicatePolicy,
}

impl SubmitRules {
    pub fn from_config(config: &RdoConfig) -> anyhow::Result<Self> {
        Ok(Self {
            root: config.download_root()?,
            allowed_schemes: config.allowed_schemes.clone(),
            duplicates: config.duplicate_urls,
        })
    }
}

impl Ledger {
    /// Create `Queued` tasks for `urls`, destinations derived from each URL.
    pub async fn create(&self, rules: &SubmitRules, urls: &[String]) -> RdoResult<SubmitReport> {
        let submissions: Vec<Submission> = urls.iter().map(Submission::url).collect();
        self.create_with(rules, &submissions).await
    }

    /// Validate and record each submission independently.
    ///
    /// Invalid entries are reported in `rejected` and never touch the store;
    /// the rest are accepted even when some of the batch is rejected.
    pub async fn create_with(
        &self,
        rules: &SubmitRules,
        submissions: &[Submission],
    ) -> RdoResult<SubmitReport> {
        let _submit = self.submit_lock.lock().await;
        let mut taken = self.claimed_destinations().await?;
        let mut report = SubmitReport::default();

        for sub in submissions {
            let url = match validate_url(&sub.url, &rules.allowed_schemes) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %sub.url, error = %e, "rejected submission");
                    report.rejected.push(Rejection::new(&sub.url, e));
                    continue;
                }
            };

            if rules.duplicates == DuplicatePolicy::Reuse {
                if let Some(existing) = self.reusable_by_url(url.as_str()).await? {
                    debug!(task_id = existing.id, url = %url, "reusing existing task");
                    report.accepted.push(existing);
                    continue;
                }
            }

            let destination =
                match resolve_destination(&rules.root, sub.destination.as_deref(), &url) {
                    Ok(d) => unique_destination(d, &taken),
                    Err(e) => {
                        warn!(url = %sub.url, error = %e, "rejected submission");
                        report.rejected.push(Rejection::new(&sub.url, e));
                        continue;
                    }
                };

            let task = self.insert(url.as_str(), &destination).await?;
            info!(task_id = task.id, url = %task.url, dest = %destination.display(), "task queued");
            taken.insert(destination);
            report.accepted.push(task);
        }

        Ok(report)
    }

    async fn insert(&self, url: &str, destination: &Path) -> RdoResult<DownloadTask> {
        let now = now_millis();
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (url, destination, status, bytes_done, retry_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
            "#,
        )
        .bind(url)
        .bind(destination.to_string_lossy().into_owned())
        .bind(TaskStatus::Queued.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let task = self.get(id).await?;
        if let Some(events) = &self.events {
            events.publish_task(&task);
        }
        Ok(task)
    }

    /// Atomic read-modify-write of one record.
    ///
    /// Holds that record's lock for the whole cycle. If `mutate` returns an
    /// error, or the result breaks a record invariant, nothing is written.
    /// A status change is published after it is committed.
    pub async fn update<F>(&self, id: TaskId, mutate: F) -> RdoResult<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask) -> RdoResult<()>,
    {
        let _guard = self.locks.acquire(id).await;
        let before = self.get(id).await?;
        let mut after = before.clone();
        mutate(&mut after)?;
        check_record(&before, &after)?;
        if after == before {
            return Ok(after);
        }
        after.updated_at = now_millis().max(before.updated_at);

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?1,
                bytes_total = ?2,
                bytes_done = ?3,
                retry_count = ?4,
                attempt = ?5,
                last_error = ?6,
                fallback_requested = ?7,
                sha256 = ?8,
                duplicate_of = ?9,
                next_attempt_at = ?10,
                updated_at = ?11
            WHERE id = ?12
            "#,
        )
        .bind(after.status.as_str())
        .bind(after.bytes_total.map(|n| n as i64))
        .bind(after.bytes_done as i64)
        .bind(after.retry_count as i64)
        .bind(after.attempt as i64)
        .bind(after.last_error.as_deref())
        .bind(after.fallback_requested as i64)
        .bind(after.sha256.as_deref())
        .bind(after.duplicate_of)
        .bind(after.next_attempt_at)
        .bind(after.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if after.status != before.status {
            debug!(task_id = id, from = %before.status, to = %after.status, "status changed");
            if let Some(events) = &self.events {
                events.publish_task(&after);
            }
        }
        Ok(after)
    }

    /// Return every `Active` record to `Queued`, keeping its checkpoint.
    /// Run once at startup, before admission begins.
    pub async fn recover_active(&self) -> RdoResult<Vec<TaskId>> {
        let stranded = self.list_by_status(TaskStatus::Active).await?;
        let mut recovered = Vec::with_capacity(stranded.len());
        for task in stranded {
            let res = self
                .update(task.id, |t| {
                    t.require(TaskStatus::Active, "recover")?;
                    t.move_to(TaskStatus::Queued, "recover")
                })
                .await;
            match res {
                Ok(t) => {
                    info!(task_id = t.id, bytes_done = t.bytes_done, "recovered stranded task");
                    recovered.push(t.id);
                }
                Err(e) if e.refused_status().is_some() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    /// Move the oldest eligible `Queued` task to `Active` and return it.
    ///
    /// A task is eligible once its backoff deadline (if any) is `<= now`.
    /// Candidates that change status underneath (e.g. cancelled) are skipped.
    pub async fn claim_next_queued(&self, now: i64) -> RdoResult<Option<DownloadTask>> {
        self.claim_next_queued_except(now, &[]).await
    }

    /// Like [`claim_next_queued`](Self::claim_next_queued), passing over the
    /// ids in `busy` (tasks whose previous fetcher has not exited yet).
    ///
    /// Each claim bumps the record's `attempt`, so writes from an older
    /// fetcher of the same task are refused.
    pub async fn claim_next_queued_except(
        &self,
        now: i64,
        busy: &[TaskId],
    ) -> RdoResult<Option<DownloadTask>> {
        let limit = 8 + busy.len() as i64;
        let candidates = self.due_queued_ids(now, limit).await?;
        for id in candidates.into_iter().filter(|id| !busy.contains(id)) {
            let res = self
                .update(id, |t| {
                    t.require(TaskStatus::Queued, "claim")?;
                    t.move_to(TaskStatus::Active, "claim")?;
                    t.attempt = t.attempt.wrapping_add(1);
                    t.next_attempt_at = None;
                    Ok(())
                })
                .await;
            match res {
                Ok(task) => return Ok(Some(task)),
                Err(e) if e.refused_status().is_some() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

fn check_record(before: &DownloadTask, after: &DownloadTask) -> RdoResult<()> {
    let invariant = |reason: &str| RdoError::Invariant {
        id: before.id,
        reason: reason.to_string(),
    };

    if after.id != before.id
        || after.url != before.url
        || after.destination != before.destination
        || after.created_at != before.created_at
    {
        return Err(invariant("identity fields are immutable"));
    }
    if after.status != before.status && !before.status.can_transition_to(after.status) {
        return Err(RdoError::InvalidCommand {
            id: before.id,
            command: "update",
            status: before.status,
        });
    }
    if after.attempt != before.attempt
        && (after.attempt != before.attempt.wrapping_add(1) || after.status != TaskStatus::Active)
    {
        return Err(invariant("attempt only advances when a task is claimed"));
    }
    if let Some(total) = after.bytes_total {
        if after.bytes_done > total {
            return Err(invariant("bytes_done exceeds bytes_total"));
        }
    }
    Ok(())
}
