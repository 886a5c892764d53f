//! Controller command tests that need no network: the queue is never started
//! (or is empty), so no fetcher runs.

use std::time::Duration;

use super::*;
use crate::broadcast::{Delivery, Event};
use crate::error::RdoError;
use crate::ledger::open_memory;
use crate::storage::temp_path;

async fn launch(dir: &std::path::Path, cancel_partial: PartialFilePolicy) -> Controller {
    let config = RdoConfig {
        download_dir: Some(dir.to_path_buf()),
        cancel_partial,
        ..RdoConfig::default()
    };
    Controller::launch(open_memory().await.unwrap(), &config)
        .await
        .unwrap()
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn submit_reports_per_url() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let report = c
        .submit(&urls(&["https://h.example/a.bin", "gopher://h.example/b"]))
        .await
        .unwrap();
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.accepted[0].destination, dir.path().join("a.bin"));
    assert!(!c.is_running());
    c.shutdown().await;
}

#[tokio::test]
async fn commands_refuse_wrong_status() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let id = c.submit(&urls(&["https://h.example/a"])).await.unwrap().accepted[0].id;

    for res in [c.pause(id).await, c.resume(id).await, c.retry(id, false).await] {
        assert_eq!(res.unwrap_err().refused_status(), Some(TaskStatus::Queued));
    }
    assert!(matches!(c.get(999).await, Err(RdoError::NotFound(999))));
    assert!(matches!(c.cancel(999).await, Err(RdoError::NotFound(999))));

    c.cancel(id).await.unwrap();
    let again = c.cancel(id).await.unwrap_err();
    assert!(matches!(
        again,
        RdoError::InvalidCommand { command: "cancel", status: TaskStatus::Cancelled, .. }
    ));
    c.shutdown().await;
}

#[tokio::test]
async fn cancel_applies_partial_file_policy() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let task = c.submit(&urls(&["https://h.example/gone.bin"])).await.unwrap().accepted[0].clone();
    std::fs::write(temp_path(&task.destination), b"partial").unwrap();
    c.cancel(task.id).await.unwrap();
    assert!(!temp_path(&task.destination).exists());
    c.shutdown().await;

    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Retain).await;
    let task = c.submit(&urls(&["https://h.example/kept.bin"])).await.unwrap().accepted[0].clone();
    std::fs::write(temp_path(&task.destination), b"partial").unwrap();
    c.cancel(task.id).await.unwrap();
    assert!(temp_path(&task.destination).exists());
    c.shutdown().await;
}

#[tokio::test]
async fn retry_resets_budget_and_records_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let id = c.submit(&urls(&["https://h.example/f"])).await.unwrap().accepted[0].id;

    // Drive it to Failed by hand; the queue is not running.
    c.ledger().claim_next_queued(i64::MAX).await.unwrap().unwrap();
    c.ledger()
        .update(id, |t| {
            t.retry_count = 5;
            t.last_error = Some("HTTP 503".into());
            t.move_to(TaskStatus::Failed, "fail")
        })
        .await
        .unwrap();
    assert_eq!(c.list_failed().await.unwrap().len(), 1);

    let task = c.retry(id, true).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 0);
    assert!(task.fallback_requested);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 503"));
    assert!(c.list_failed().await.unwrap().is_empty());
    c.shutdown().await;
}

#[tokio::test]
async fn start_and_pause_all_broadcast_queue_state() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let mut sub = c.subscribe();

    c.start();
    assert!(c.is_running());
    c.start();
    assert!(c.pause_all().await.unwrap().is_empty());
    assert!(!c.is_running());

    let mut seen = Vec::new();
    while let Ok(Some(Delivery::Event(Event::Queue { running }))) =
        tokio::time::timeout(Duration::from_millis(50), sub.recv()).await
    {
        seen.push(running);
    }
    assert_eq!(seen, vec![true, false]);
    c.shutdown().await;
}

#[tokio::test]
async fn resume_all_requeues_paused_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    let id = c.submit(&urls(&["https://h.example/p"])).await.unwrap().accepted[0].id;
    c.ledger().claim_next_queued(i64::MAX).await.unwrap();
    // No fetcher is registered for it, so pause only flips the record.
    c.pause(id).await.unwrap();
    assert_eq!(c.get(id).await.unwrap().status, TaskStatus::Paused);

    // Keep admission off while re-queueing so nothing is fetched.
    c.shutdown().await;
    assert_eq!(c.resume_all().await.unwrap(), vec![id]);
    assert_eq!(c.get(id).await.unwrap().status, TaskStatus::Queued);
}

#[tokio::test]
async fn list_has_no_rate_for_idle_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let c = launch(dir.path(), PartialFilePolicy::Delete).await;
    c.submit(&urls(&["https://h.example/1", "https://h.example/2"])).await.unwrap();
    let views = c.list().await.unwrap();
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.speed.is_none() && v.eta_secs.is_none()));
    let json = serde_json::to_value(&views[0]).unwrap();
    assert_eq!(json["status"], "queued");
    assert!(json["speed"].is_null());
    c.shutdown().await;
}
