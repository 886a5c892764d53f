//! `rdo run` – run the orchestrator and serve the control socket.

use anyhow::{bail, Result};
use rdo_core::control::default_control_socket_path;
use rdo_core::{Controller, Delivery, Event, Ledger, RdoConfig, Subscription, TaskId, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::control_socket::{self, ControlClient};
use crate::cli::display::progress_line;

const PROGRESS_INTERVAL_MS: u64 = 500;
const IDLE_CHECK_MS: u64 = 200;

pub async fn run_orchestrator(cfg: &RdoConfig, start: bool, until_idle: bool) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    if ControlClient::connect(&socket_path).await?.is_some() {
        bail!(
            "an orchestrator is already serving {}",
            socket_path.display()
        );
    }

    let ledger = Ledger::open_default().await?;
    let controller = Arc::new(Controller::launch(ledger, cfg).await?);
    let listener = control_socket::spawn_control_listener(Arc::clone(&controller), &socket_path)?;
    let printer = tokio::spawn(print_events(controller.subscribe()));

    if start {
        controller.start();
    } else {
        println!("Orchestrator ready; queue is stopped (use `rdo start`).");
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!("waiting for ctrl-c: {}", e);
            }
            tracing::info!("interrupted; shutting down");
        }
        _ = wait_idle(&controller), if until_idle => {
            tracing::info!("no queued or active tasks left");
        }
    }

    controller.shutdown().await;
    listener.abort();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("remove control socket: {}", e);
    }
    printer.abort();

    print_summary(controller.ledger()).await
}

/// Resolves once nothing is queued, active or still being fetched.
async fn wait_idle(controller: &Controller) {
    let ledger = controller.ledger();
    loop {
        tokio::time::sleep(Duration::from_millis(IDLE_CHECK_MS)).await;
        let counts = tokio::try_join!(
            ledger.count_by_status(TaskStatus::Queued),
            ledger.count_by_status(TaskStatus::Active),
        );
        match counts {
            Ok((0, 0)) if controller.in_flight().is_empty() => return,
            Ok(_) => {}
            Err(e) => tracing::warn!("idle check: {}", e),
        }
    }
}

/// Status changes as they happen; progress at most every `PROGRESS_INTERVAL_MS` per task.
async fn print_events(mut events: Subscription) {
    let mut last_print: HashMap<TaskId, Instant> = HashMap::new();
    while let Some(delivery) = events.recv().await {
        match delivery {
            Delivery::Event(Event::Progress(p)) => {
                let now = Instant::now();
                let due = last_print.get(&p.task_id).map_or(true, |at| {
                    now.duration_since(*at) >= Duration::from_millis(PROGRESS_INTERVAL_MS)
                });
                if due || p.bytes_total == Some(p.bytes_done) {
                    println!("{}", progress_line(&p));
                    last_print.insert(p.task_id, now);
                }
            }
            Delivery::Event(Event::Task(t)) => {
                match &t.last_error {
                    Some(err) if t.status != TaskStatus::Active => {
                        println!("#{} {} ({})", t.task_id, t.status, err)
                    }
                    _ => println!("#{} {}", t.task_id, t.status),
                }
                if t.status != TaskStatus::Active {
                    last_print.remove(&t.task_id);
                }
            }
            Delivery::Event(Event::Queue { running }) => {
                println!("Queue {}", if running { "started" } else { "paused" });
            }
            Delivery::Missed(n) => tracing::debug!("progress printer missed {} event(s)", n),
        }
    }
}

async fn print_summary(ledger: &Ledger) -> Result<()> {
    let mut parts = Vec::new();
    for status in [
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Queued,
        TaskStatus::Paused,
    ] {
        let n = ledger.count_by_status(status).await?;
        if n > 0 {
            parts.push(format!("{n} {status}"));
        }
    }
    if parts.is_empty() {
        println!("No tasks in ledger.");
    } else {
        println!("Ledger: {}", parts.join(", "));
    }
    Ok(())
}
