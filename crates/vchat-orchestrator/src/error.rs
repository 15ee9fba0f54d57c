//! Orchestrator error types.

use thiserror::Error;

use vchat_process::ProcessError;
use vchat_store::StoreError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Synchronous rejections of orchestrator operations.
///
/// Worker crashes are not errors here: they are reconciled into the job's
/// `error` status and only visible by polling the job.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} already has an active worker")]
    JobBusy(String),

    #[error("Job {0} has no active worker")]
    NotRunning(String),

    #[error("Job {0} was abandoned before its worker started")]
    Abandoned(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Worker launch failed: {0}")]
    LaunchFailure(#[source] ProcessError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn job_busy(id: impl Into<String>) -> Self {
        Self::JobBusy(id.into())
    }

    pub fn not_running(id: impl Into<String>) -> Self {
        Self::NotRunning(id.into())
    }

    pub fn abandoned(id: impl Into<String>) -> Self {
        Self::Abandoned(id.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, OrchestratorError::JobBusy(_))
    }
}

impl From<ProcessError> for OrchestratorError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::EmptyCommand => Self::InvalidCommand(err.to_string()),
            other => Self::LaunchFailure(other),
        }
    }
}
