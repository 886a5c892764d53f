//! Error produced by one transfer attempt.

use std::fmt;

/// Why a transfer attempt stopped short of completion.
///
/// Never surfaced to callers of the control surface: the fetcher classifies
/// it and records the outcome as the task's status and `last_error`.
#[derive(Debug)]
pub enum TransferError {
    /// Curl reported an error (timeout, stall, connection reset, etc.).
    Curl(curl::Error),
    /// HTTP response had a status that is neither 200 nor 206.
    Http(u32),
    /// Body ended before the known total was reached.
    PartialTransfer { expected: u64, received: u64 },
    /// Server sent more bytes than the total it announced.
    Overflow { expected: u64, received: u64 },
    /// Remote size differs from the size recorded on an earlier attempt.
    SizeChanged { recorded: u64, reported: u64 },
    /// Server refused the resume offset and the checkpoint is not complete.
    RangeNotSatisfiable { offset: u64 },
    /// Disk write, sync or rename failed.
    Storage(std::io::Error),
    /// Checkpoint could not be persisted.
    Ledger(crate::error::RdoError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Curl(e) => write!(f, "{}", e),
            TransferError::Http(code) => write!(f, "HTTP {}", code),
            TransferError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            TransferError::Overflow { expected, received } => {
                write!(f, "server sent {} bytes, more than the {} announced", received, expected)
            }
            TransferError::SizeChanged { recorded, reported } => {
                write!(f, "remote size changed from {} to {} bytes", recorded, reported)
            }
            TransferError::RangeNotSatisfiable { offset } => {
                write!(f, "server rejected resume offset {}", offset)
            }
            TransferError::Storage(e) => write!(f, "storage: {}", e),
            TransferError::Ledger(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Curl(e) => Some(e),
            TransferError::Storage(e) => Some(e),
            TransferError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Storage(e)
    }
}

impl From<crate::error::RdoError> for TransferError {
    fn from(e: crate::error::RdoError) -> Self {
        TransferError::Ledger(e)
    }
}
