//! Types stored in and returned by the task ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{RdoError, RdoResult, ValidationError};

/// Task identifier.
pub type TaskId = i64;

/// Task state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "active" => Some(TaskStatus::Active),
            "paused" => Some(TaskStatus::Paused),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// The only status edges a record may take.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Active)
            | (Active, Paused)
            | (Paused, Queued)
            | (Active, Completed)
            | (Active, Queued)
            | (Active, Failed)
            | (Failed, Queued) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One download job as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: TaskId,
    pub url: String,
    pub destination: PathBuf,
    pub status: TaskStatus,
    pub bytes_total: Option<u64>,
    /// Persisted checkpoint: bytes durably written to the `.part` file.
    pub bytes_done: u64,
    pub retry_count: u32,
    /// Claim generation: bumped each time the task is admitted to `Active`.
    #[serde(default)]
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Set by a manual retry for the downstream extraction pipeline.
    pub fallback_requested: bool,
    /// Lowercase hex SHA-256 of the completed file.
    pub sha256: Option<String>,
    /// Earlier completed task from another URL with identical content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<TaskId>,
    /// Unix millis before which a re-queued task is not admitted.
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DownloadTask {
    /// Fraction complete in [0.0, 1.0]; None while the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_done as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Veto a mutation unless the record is currently in `status`.
    pub fn require(&self, status: TaskStatus, command: &'static str) -> RdoResult<()> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.refuse(command))
        }
    }

    /// Veto a mutation unless the record is still `Active` under the claim
    /// generation `attempt`.
    pub fn require_claim(&self, attempt: u32, command: &'static str) -> RdoResult<()> {
        self.require(TaskStatus::Active, command)?;
        if self.attempt == attempt {
            Ok(())
        } else {
            Err(self.refuse(command))
        }
    }

    /// Take one edge of the state machine, or veto the mutation.
    pub fn move_to(&mut self, next: TaskStatus, command: &'static str) -> RdoResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(self.refuse(command));
        }
        self.status = next;
        Ok(())
    }

    fn refuse(&self, command: &'static str) -> RdoError {
        RdoError::InvalidCommand {
            id: self.id,
            command,
            status: self.status,
        }
    }
}

/// One entry of a bulk submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub url: String,
    /// Destination relative to the download root; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

impl Submission {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: None,
        }
    }

    pub fn with_destination(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: Some(destination.into()),
        }
    }
}

/// A submission entry that was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub url: String,
    pub reason: String,
    #[serde(skip)]
    pub error: Option<ValidationError>,
}

impl Rejection {
    pub fn new(url: impl Into<String>, error: ValidationError) -> Self {
        Self {
            url: url.into(),
            reason: error.to_string(),
            error: Some(error),
        }
    }
}

/// Outcome of a bulk submission: partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitReport {
    pub accepted: Vec<DownloadTask>,
    pub rejected: Vec<Rejection>,
}
