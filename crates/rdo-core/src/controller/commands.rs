//! Task commands expressed as guarded ledger updates.
//!
//! The [`Controller`](super::Controller) wraps these with fetcher signalling
//! and admission wake-ups. They are public so a front end can apply them to
//! the ledger directly when no orchestrator is running.

use tracing::info;

use crate::config::PartialFilePolicy;
use crate::error::RdoResult;
use crate::fetcher::discard_partial;
use crate::ledger::{DownloadTask, Ledger, TaskId, TaskStatus};

/// `Paused → Queued`, clearing any backoff deadline.
pub async fn resume(ledger: &Ledger, id: TaskId) -> RdoResult<DownloadTask> {
    ledger
        .update(id, |t| {
            t.require(TaskStatus::Paused, "resume")?;
            t.next_attempt_at = None;
            t.move_to(TaskStatus::Queued, "resume")
        })
        .await
}

/// `Failed → Queued` with a fresh retry budget.
pub async fn retry(ledger: &Ledger, id: TaskId, fallback: bool) -> RdoResult<DownloadTask> {
    let task = ledger
        .update(id, |t| {
            t.require(TaskStatus::Failed, "retry")?;
            t.retry_count = 0;
            t.next_attempt_at = None;
            t.fallback_requested = fallback;
            t.move_to(TaskStatus::Queued, "retry")
        })
        .await?;
    info!(task_id = id, fallback, "manual retry");
    Ok(task)
}

/// Mark a task `Cancelled` and return it with the status it left.
pub async fn mark_cancelled(ledger: &Ledger, id: TaskId) -> RdoResult<(DownloadTask, TaskStatus)> {
    let mut previous = TaskStatus::Cancelled;
    let task = ledger
        .update(id, |t| {
            previous = t.status;
            t.move_to(TaskStatus::Cancelled, "cancel")
        })
        .await?;
    Ok((task, previous))
}

/// Cancel a task nobody is fetching and handle its partial file per `policy`.
pub async fn cancel_idle(
    ledger: &Ledger,
    id: TaskId,
    policy: PartialFilePolicy,
) -> RdoResult<DownloadTask> {
    let (task, previous) = mark_cancelled(ledger, id).await?;
    discard_partial(id, &task.destination, policy).await;
    info!(task_id = id, from = %previous, "task cancelled");
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::error::RdoError;
    use crate::ledger::{open_memory, SubmitRules};
    use crate::storage::temp_path;

    async fn ledger_with_task(root: &std::path::Path) -> (Ledger, DownloadTask) {
        let ledger = open_memory().await.unwrap();
        let rules = SubmitRules {
            root: root.to_path_buf(),
            allowed_schemes: vec!["https".into()],
            duplicates: DuplicatePolicy::Reuse,
        };
        let report = ledger
            .create(&rules, &["https://h.example/x.bin".to_string()])
            .await
            .unwrap();
        let task = report.accepted[0].clone();
        (ledger, task)
    }

    #[tokio::test]
    async fn retry_requires_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, task) = ledger_with_task(dir.path()).await;
        let err = retry(&ledger, task.id, true).await.unwrap_err();
        assert_eq!(err.refused_status(), Some(TaskStatus::Queued));

        ledger
            .update(task.id, |t| t.move_to(TaskStatus::Active, "claim"))
            .await
            .unwrap();
        ledger
            .update(task.id, |t| {
                t.retry_count = 5;
                t.move_to(TaskStatus::Failed, "fail")
            })
            .await
            .unwrap();

        let requeued = retry(&ledger, task.id, true).await.unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert_eq!(requeued.retry_count, 0);
        assert!(requeued.fallback_requested);
    }

    #[tokio::test]
    async fn cancel_idle_removes_partial_and_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, task) = ledger_with_task(dir.path()).await;
        std::fs::write(temp_path(&task.destination), b"abc").unwrap();

        let cancelled = cancel_idle(&ledger, task.id, PartialFilePolicy::Delete).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(!temp_path(&task.destination).exists());

        let err = resume(&ledger, task.id).await.unwrap_err();
        assert!(matches!(err, RdoError::InvalidCommand { command: "resume", .. }));
    }
}
