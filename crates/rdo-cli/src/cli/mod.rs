//! CLI for the RDO download orchestrator.

mod commands;
mod control_socket;
mod display;
mod protocol;
mod target;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rdo_core::config;
use rdo_core::TaskId;
use std::path::PathBuf;

use commands::{
    run_add, run_cancel, run_list, run_orchestrator, run_pause, run_resume, run_retry, run_start,
    run_watch,
};

/// Top-level CLI for the RDO download orchestrator.
#[derive(Debug, Parser)]
#[command(name = "rdo")]
#[command(about = "RDO: resumable concurrent download orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one or more downloads.
    Add {
        /// HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Destination relative to the download directory (single URL only).
        #[arg(long, value_name = "PATH")]
        dest: Option<PathBuf>,
    },

    /// List tasks with their status and progress.
    List {
        /// Show only failed tasks.
        #[arg(long)]
        failed: bool,
    },

    /// Run the orchestrator and serve the control socket until interrupted.
    Run {
        /// Start admitting queued tasks immediately.
        #[arg(long)]
        start: bool,

        /// Exit once no task is queued or active.
        #[arg(long)]
        until_idle: bool,
    },

    /// Start queue processing in the running orchestrator.
    Start,

    /// Pause one active task, or every task and the queue when no ID is given.
    Pause {
        /// Task identifier.
        id: Option<TaskId>,
    },

    /// Resume one paused task, or every paused task and the queue when no ID is given.
    Resume {
        /// Task identifier.
        id: Option<TaskId>,
    },

    /// Cancel a task. Cancelled tasks are never resumed.
    Cancel {
        /// Task identifier.
        id: TaskId,
    },

    /// Re-queue a failed task with a fresh retry budget.
    Retry {
        /// Task identifier.
        id: TaskId,

        /// Ask the downstream pipeline to use its fallback extraction path.
        #[arg(long)]
        fallback: bool,
    },

    /// Stream live events from the running orchestrator as JSON lines.
    Watch {
        /// Only show events for this task (queue events are always shown).
        id: Option<TaskId>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Add { urls, dest } => run_add(&cfg, &urls, dest.as_deref()).await?,
            CliCommand::List { failed } => run_list(failed).await?,
            CliCommand::Run { start, until_idle } => run_orchestrator(&cfg, start, until_idle).await?,
            CliCommand::Start => run_start().await?,
            CliCommand::Pause { id } => run_pause(id).await?,
            CliCommand::Resume { id } => run_resume(id).await?,
            CliCommand::Cancel { id } => run_cancel(&cfg, id).await?,
            CliCommand::Retry { id, fallback } => run_retry(id, fallback).await?,
            CliCommand::Watch { id } => run_watch(id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
