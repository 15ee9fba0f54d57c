//! Error types for worker process operations.

use thiserror::Error;

/// Result type for worker process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur before a worker is running.
///
/// Anything that happens after a successful spawn (nonzero exit, crash,
/// garbage on stdout) is reported through the run's event sequence instead.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("Failed to launch worker '{program}': {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker program not found: {0}")]
    ProgramNotFound(String),
}

impl ProcessError {
    pub fn launch_failure(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::LaunchFailure {
            program: program.into(),
            source,
        }
    }

    /// True if the worker binary could not be found on disk or in PATH.
    pub fn is_missing_program(&self) -> bool {
        match self {
            ProcessError::ProgramNotFound(_) => true,
            ProcessError::LaunchFailure { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            ProcessError::EmptyCommand => false,
        }
    }
}
