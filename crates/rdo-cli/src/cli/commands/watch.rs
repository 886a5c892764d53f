//! `rdo watch` – print the live event stream as JSON lines.

use anyhow::{anyhow, Result};
use rdo_core::TaskId;

use crate::cli::protocol::line_concerns;
use crate::cli::target::connect_orchestrator;

pub async fn run_watch(only: Option<TaskId>) -> Result<()> {
    let client = connect_orchestrator()
        .await?
        .ok_or_else(|| anyhow!("no orchestrator is running (start one with `rdo run`)"))?;
    let mut events = client.subscribe().await?;
    while let Some(line) = events.next_line().await? {
        if line_concerns(&line, only) {
            println!("{line}");
        }
    }
    tracing::debug!("event stream closed by orchestrator");
    Ok(())
}
