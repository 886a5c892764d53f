//! Errors surfaced synchronously by the control surface.
//!
//! Transfer failures are not here: they are absorbed by the fetcher and only
//! ever show up as a task's `status` / `last_error` (see `retry::TransferError`).

use std::path::PathBuf;
use thiserror::Error;

use crate::ledger::{TaskId, TaskStatus};

/// A submitted URL or destination that was rejected before any record was created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed URL {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },
    #[error("scheme {scheme:?} is not allowed for {url:?}")]
    SchemeNotAllowed { url: String, scheme: String },
    #[error("URL {0:?} has no host")]
    MissingHost(String),
    #[error("destination {0:?} escapes the download root")]
    PathTraversal(PathBuf),
    #[error("destination {0:?} is empty after sanitizing")]
    EmptyDestination(PathBuf),
}

#[derive(Debug, Error)]
pub enum RdoError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("cannot {command} task {id}: it is {status}")]
    InvalidCommand {
        id: TaskId,
        command: &'static str,
        status: TaskStatus,
    },

    #[error("ledger: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("task {id}: {reason}")]
    Invariant { id: TaskId, reason: String },
}

impl RdoError {
    /// Status the record was in when a guarded update was refused.
    pub fn refused_status(&self) -> Option<TaskStatus> {
        match self {
            RdoError::InvalidCommand { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type RdoResult<T> = Result<T, RdoError>;
