//! `rdo start | pause | resume | cancel | retry` – state-machine commands.
//!
//! With an orchestrator running, commands go through its control socket so
//! in-flight transfers are signalled. Without one, commands that only touch
//! the ledger are applied to it directly.

use anyhow::{anyhow, Result};
use rdo_core::controller::commands;
use rdo_core::{DownloadTask, RdoConfig, TaskId, TaskStatus};

use crate::cli::control_socket::ControlClient;
use crate::cli::protocol::{ControlRequest, QueueStatus};
use crate::cli::target::{connect_orchestrator, Target};

fn no_orchestrator(what: &str) -> anyhow::Error {
    anyhow!("{what} needs a running orchestrator (start one with `rdo run`)")
}

async fn request_task(client: &mut ControlClient, request: ControlRequest) -> Result<DownloadTask> {
    client.request(&request).await?.into_data()
}

fn print_task(verb: &str, task: &DownloadTask) {
    println!("{verb} task {} ({})", task.id, task.status);
}

pub async fn run_start() -> Result<()> {
    let mut client = connect_orchestrator()
        .await?
        .ok_or_else(|| no_orchestrator("start"))?;
    let status: QueueStatus = client.request(&ControlRequest::Start).await?.into_data()?;
    println!(
        "Queue started ({} task(s) in flight)",
        status.in_flight.len()
    );
    Ok(())
}

pub async fn run_pause(id: Option<TaskId>) -> Result<()> {
    let mut client = connect_orchestrator()
        .await?
        .ok_or_else(|| no_orchestrator("pause"))?;
    match id {
        Some(id) => {
            let task = request_task(&mut client, ControlRequest::Pause(id)).await?;
            print_task("Paused", &task);
        }
        None => {
            let paused: Vec<TaskId> = client.request(&ControlRequest::PauseAll).await?.into_data()?;
            println!("Queue paused; paused {} active task(s)", paused.len());
        }
    }
    Ok(())
}

pub async fn run_resume(id: Option<TaskId>) -> Result<()> {
    match (Target::connect().await?, id) {
        (Target::Orchestrator(mut client), Some(id)) => {
            let task = request_task(&mut client, ControlRequest::Resume(id)).await?;
            print_task("Resumed", &task);
        }
        (Target::Orchestrator(mut client), None) => {
            let resumed: Vec<TaskId> = client.request(&ControlRequest::ResumeAll).await?.into_data()?;
            println!("Queue resumed; re-queued {} paused task(s)", resumed.len());
        }
        (Target::Ledger(ledger), Some(id)) => {
            let task = commands::resume(&ledger, id).await?;
            print_task("Resumed", &task);
        }
        (Target::Ledger(ledger), None) => {
            let mut resumed = 0usize;
            for task in ledger.list_by_status(TaskStatus::Paused).await? {
                commands::resume(&ledger, task.id).await?;
                resumed += 1;
            }
            println!("Re-queued {resumed} paused task(s); they start with the next `rdo run --start`");
        }
    }
    Ok(())
}

pub async fn run_cancel(cfg: &RdoConfig, id: TaskId) -> Result<()> {
    let task = match Target::connect().await? {
        Target::Orchestrator(mut client) => {
            request_task(&mut client, ControlRequest::Cancel(id)).await?
        }
        Target::Ledger(ledger) => commands::cancel_idle(&ledger, id, cfg.cancel_partial).await?,
    };
    print_task("Cancelled", &task);
    Ok(())
}

pub async fn run_retry(id: TaskId, fallback: bool) -> Result<()> {
    let task = match Target::connect().await? {
        Target::Orchestrator(mut client) => {
            request_task(&mut client, ControlRequest::Retry { id, fallback }).await?
        }
        Target::Ledger(ledger) => commands::retry(&ledger, id, fallback).await?,
    };
    print_task("Re-queued", &task);
    Ok(())
}
