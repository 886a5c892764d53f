#![allow(dead_code)]

pub mod range_server;

use std::path::Path;
use std::time::{Duration, Instant};

use rdo_core::config::RetryConfig;
use rdo_core::{Controller, DownloadTask, RdoConfig, TaskId};

/// Config for fast tests: small chunks, quick polling, near-instant backoff.
pub fn test_config(download_dir: &Path) -> RdoConfig {
    RdoConfig {
        download_dir: Some(download_dir.to_path_buf()),
        chunk_size: 64 * 1024,
        poll_interval_ms: 20,
        connect_timeout_secs: 5,
        stall_timeout_secs: 10,
        retry: Some(RetryConfig {
            max_attempts: 5,
            base_delay_secs: 0.01,
            max_delay_secs: 1,
        }),
        ..RdoConfig::default()
    }
}

/// Deterministic, non-repeating-per-chunk test body.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll a task until `cond` holds; panics after `timeout`.
pub async fn wait_for<F>(c: &Controller, id: TaskId, timeout: Duration, cond: F) -> DownloadTask
where
    F: Fn(&DownloadTask) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let task = c.get(id).await.unwrap();
        if cond(&task) {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting on task {id}; last seen {task:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until no fetcher is running.
pub async fn wait_idle(c: &Controller, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !c.in_flight().is_empty() {
        assert!(Instant::now() < deadline, "fetchers still running: {:?}", c.in_flight());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
