//! Task read operations.

use sqlx::Row;
use std::collections::HashSet;
use std::path::PathBuf;

use super::super::db::{task_from_row, Ledger, TASK_COLUMNS};
use super::super::types::{DownloadTask, TaskId, TaskStatus};
use crate::error::{RdoError, RdoResult};

impl Ledger {
    /// Fetch one task; `NotFound` when the id was never assigned.
    pub async fn get(&self, id: TaskId) -> RdoResult<DownloadTask> {
        self.find(id).await?.ok_or(RdoError::NotFound(id))
    }

    pub async fn find(&self, id: TaskId) -> RdoResult<Option<DownloadTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(task_from_row).transpose()?)
    }

    /// All tasks in submission order.
    pub async fn list(&self) -> RdoResult<Vec<DownloadTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| task_from_row(r).map_err(RdoError::from))
            .collect()
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> RdoResult<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| task_from_row(r).map_err(RdoError::from))
            .collect()
    }

    /// Tasks whose retries are exhausted or that failed permanently.
    pub async fn list_failed(&self) -> RdoResult<Vec<DownloadTask>> {
        self.list_by_status(TaskStatus::Failed).await
    }

    /// Oldest non-cancelled task for `url`, if any.
    pub async fn reusable_by_url(&self, url: &str) -> RdoResult<Option<DownloadTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE url = ?1 AND status != 'cancelled' \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(task_from_row).transpose()?)
    }

    /// Oldest `Completed` task fetched from a URL other than `url` whose
    /// file hashed to `sha256`.
    pub async fn completed_by_sha256(
        &self,
        sha256: &str,
        url: &str,
    ) -> RdoResult<Option<DownloadTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE sha256 = ?1 AND url != ?2 AND status = 'completed' \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(sha256)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(task_from_row).transpose()?)
    }

    /// Destinations claimed by tasks that still own (or will own) a file.
    pub(crate) async fn claimed_destinations(&self) -> RdoResult<HashSet<PathBuf>> {
        let rows = sqlx::query("SELECT destination FROM tasks WHERE status != 'cancelled'")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            let dest: String = row.try_get("destination")?;
            out.insert(PathBuf::from(dest));
        }
        Ok(out)
    }

    /// Soonest backoff deadline among queued tasks still waiting, in unix millis.
    pub async fn earliest_retry_at(&self) -> RdoResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT MIN(next_attempt_at) AS at FROM tasks \
             WHERE status = 'queued' AND next_attempt_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("at")?)
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> RdoResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tasks WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    /// Ids of queued tasks eligible for admission at `now`, FIFO.
    pub(crate) async fn due_queued_ids(&self, now: i64, limit: i64) -> RdoResult<Vec<TaskId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM tasks
            WHERE status = 'queued'
              AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
            ORDER BY created_at ASC, id ASC
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get("id").map_err(RdoError::from))
            .collect()
    }
}
