//! Acquisition Engine Error Definitions
//!
//! Defines error types used throughout the acquisition engine.

use thiserror::Error;

use crate::media::{MediaId, MediaStatus};

/// Acquisition engine error types
#[derive(Error, Debug)]
pub enum AcquireError {
    // =========================================================================
    // Transport / Remote Job Errors
    // =========================================================================
    /// Channel-level failure. Always retried via reconnect, never surfaced
    /// as a job failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote job failed: {0}")]
    RemoteJobFailed(String),

    #[error("Remote job was cancelled")]
    RemoteJobCancelled,

    #[error("Remote cancel failed: {0}")]
    RemoteCancelFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Scheduler Errors
    // =========================================================================
    #[error("Task already running for media item: {0}")]
    AlreadyRunning(MediaId),

    #[error("Task for media item {id} is not cancellable in status {status}")]
    NotCancellable { id: MediaId, status: MediaStatus },

    #[error("Illegal media status transition: {from} -> {to}")]
    InvalidTransition { from: MediaStatus, to: MediaStatus },

    #[error("No task found: {0}")]
    TaskNotFound(String),

    // =========================================================================
    // Strategy Errors
    // =========================================================================
    #[error("Media item {0} has no remote job id to resume")]
    MissingJobId(MediaId),

    #[error("Media item {0} has no acquirable source")]
    UnsupportedSource(MediaId),

    // =========================================================================
    // Local / Collaborator Errors
    // =========================================================================
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Acquisition engine result type
pub type AcquireResult<T> = Result<T, AcquireError>;

impl AcquireError {
    /// Returns true when the error is a transport-level failure that the
    /// reconnect layer should absorb rather than fail the job.
    pub fn is_transport(&self) -> bool {
        matches!(self, AcquireError::Transport(_))
    }
}
