//! Error types: task-level transfer failures and service boundary errors.
//!
//! Every `TransferError` ends up as the task's user-facing `error` string, so
//! its `Display` impl is the message stored on the record.

use thiserror::Error;

/// Why a transfer ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Connection, DNS, TLS, timeout, or stall reported by curl.
    #[error("{0}")]
    Transport(String),
    /// Server reply the engine cannot use (bad status, bad Content-Range).
    #[error("{0}")]
    Protocol(String),
    /// Stream ended before the announced size was reached.
    #[error("incomplete download: got {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
    /// Writing, renaming, or opening the artifact failed.
    #[error("{0}")]
    Filesystem(String),
    /// Reported by the swarm backend.
    #[error("{0}")]
    Swarm(String),
}

impl TransferError {
    /// Non-success HTTP status on the final response.
    pub fn http_status(code: u32) -> Self {
        TransferError::Protocol(format!("HTTP error: {code}"))
    }
}

impl From<crate::swarm::SwarmError> for TransferError {
    fn from(e: crate::swarm::SwarmError) -> Self {
        TransferError::Swarm(e.0)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Filesystem(e.to_string())
    }
}

/// Failure of a request made through the service handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The URL, magnet, or file path cannot become a task.
    #[error("{0}")]
    InvalidSource(String),
    /// The control loop has shut down.
    #[error("task service is not running")]
    Stopped,
}
