//! `rdo list [--failed]` – show tasks.

use anyhow::Result;
use rdo_core::{DownloadTask, TaskView};

use crate::cli::display::{task_header, task_row};
use crate::cli::protocol::ControlRequest;
use crate::cli::target::Target;

fn idle(task: DownloadTask) -> TaskView {
    TaskView {
        task,
        speed: None,
        eta_secs: None,
    }
}

pub async fn run_list(failed: bool) -> Result<()> {
    let views: Vec<TaskView> = match Target::connect().await? {
        Target::Orchestrator(mut client) => {
            let response = client.request(&ControlRequest::List { failed }).await?;
            if failed {
                let tasks: Vec<DownloadTask> = response.into_data()?;
                tasks.into_iter().map(idle).collect()
            } else {
                response.into_data()?
            }
        }
        Target::Ledger(ledger) => {
            let tasks = if failed {
                ledger.list_failed().await?
            } else {
                ledger.list().await?
            };
            tasks.into_iter().map(idle).collect()
        }
    };

    if views.is_empty() {
        println!("{}", if failed { "No failed tasks." } else { "No tasks in ledger." });
        return Ok(());
    }
    println!("{}", task_header());
    for view in &views {
        println!("{}", task_row(view));
    }
    Ok(())
}
