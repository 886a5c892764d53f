//! Control socket round trips against a real controller (queue never started).

use std::sync::Arc;
use std::time::Duration;

use rdo_core::{Controller, Ledger, RdoConfig, SubmitReport, TaskStatus, TaskView};

use crate::cli::control_socket::{spawn_control_listener, ControlClient};
use crate::cli::protocol::{ControlRequest, QueueStatus};

async fn serve(dir: &std::path::Path) -> (Arc<Controller>, std::path::PathBuf) {
    let config = RdoConfig {
        download_dir: Some(dir.join("downloads")),
        ..RdoConfig::default()
    };
    let ledger = Ledger::open_at(dir.join("ledger.db")).await.unwrap();
    let controller = Arc::new(Controller::launch(ledger, &config).await.unwrap());
    let socket = dir.join("control.sock");
    spawn_control_listener(Arc::clone(&controller), &socket).unwrap();
    (controller, socket)
}

#[tokio::test]
async fn connect_without_listener_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = ControlClient::connect(&dir.path().join("absent.sock")).await.unwrap();
    assert!(client.is_none());
}

#[tokio::test]
async fn add_list_and_refused_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, socket) = serve(dir.path()).await;
    let mut client = ControlClient::connect(&socket).await.unwrap().unwrap();

    let report: SubmitReport = client
        .request(&ControlRequest::parse("add https://h.example/a.iso").unwrap())
        .await
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(report.accepted.len(), 1);
    let id = report.accepted[0].id;

    let rejected: SubmitReport = client
        .request(&ControlRequest::parse("add ftp://h.example/b").unwrap())
        .await
        .unwrap()
        .into_data()
        .unwrap();
    assert!(rejected.accepted.is_empty());
    assert_eq!(rejected.rejected.len(), 1);

    let listed: Vec<TaskView> = client
        .request(&ControlRequest::List { failed: false })
        .await
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task.status, TaskStatus::Queued);

    let refused = client.request(&ControlRequest::Resume(id)).await.unwrap();
    assert!(!refused.ok);
    assert!(refused.error.unwrap().contains("queued"));

    let garbage = client.request(&ControlRequest::Cancel(999)).await.unwrap();
    assert_eq!(garbage.error.as_deref(), Some("task 999 not found"));

    controller.shutdown().await;
}

#[tokio::test]
async fn subscriber_sees_task_events() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, socket) = serve(dir.path()).await;

    let watcher = ControlClient::connect(&socket).await.unwrap().unwrap();
    let mut events = watcher.subscribe().await.unwrap();
    // Let the server register the subscription before anything is published.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = ControlClient::connect(&socket).await.unwrap().unwrap();
    let report: SubmitReport = client
        .request(&ControlRequest::parse("add https://h.example/c.bin").unwrap())
        .await
        .unwrap()
        .into_data()
        .unwrap();
    let id = report.accepted[0].id;
    let cancelled = client.request(&ControlRequest::Cancel(id)).await.unwrap();
    assert!(cancelled.ok);

    let mut kinds = Vec::new();
    while kinds.len() < 2 {
        let line = tokio::time::timeout(Duration::from_secs(5), events.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "task");
        kinds.push(value["status"].as_str().unwrap().to_string());
    }
    assert_eq!(kinds, ["queued", "cancelled"]);

    controller.shutdown().await;
}

#[tokio::test]
async fn start_reports_queue_status() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, socket) = serve(dir.path()).await;
    let mut client = ControlClient::connect(&socket).await.unwrap().unwrap();

    let status: QueueStatus = client
        .request(&ControlRequest::Start)
        .await
        .unwrap()
        .into_data()
        .unwrap();
    assert!(status.running);
    assert!(status.in_flight.is_empty());
    assert!(controller.is_running());

    controller.shutdown().await;
}
