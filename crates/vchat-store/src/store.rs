//! The record store contract.

use async_trait::async_trait;

use vchat_models::{Job, JobId, JobPatch};

use crate::error::{StoreError, StoreResult};

/// Input for registering an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    /// Stored filename inside the upload directory
    pub source_artifact: String,
    /// Name the user uploaded the file under
    pub original_name: String,
}

impl NewJob {
    pub fn new(source_artifact: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            source_artifact: source_artifact.into(),
            original_name: original_name.into(),
        }
    }

    /// Create a job whose display name is the stored filename.
    pub fn from_source(source_artifact: impl Into<String>) -> Self {
        let source_artifact = source_artifact.into();
        Self {
            original_name: source_artifact.clone(),
            source_artifact,
        }
    }

    /// Validate the source reference.
    ///
    /// The source is a bare filename: it is passed to workers as a
    /// positional argument and resolved against their upload directory.
    pub fn validate(&self) -> StoreResult<()> {
        let source = self.source_artifact.trim();
        if source.is_empty() {
            return Err(StoreError::invalid_job("source filename is empty"));
        }
        if source != self.source_artifact {
            return Err(StoreError::invalid_job(
                "source filename has leading or trailing whitespace",
            ));
        }
        if source.contains('/') || source.contains('\\') || source.contains("..") {
            return Err(StoreError::invalid_job(format!(
                "source filename must not contain a path: {}",
                source
            )));
        }
        if source.chars().any(|c| c.is_control()) {
            return Err(StoreError::invalid_job("source filename contains control characters"));
        }
        Ok(())
    }
}

/// Durable mapping from job id to job state.
///
/// Pure data access: implementations never interpret status transitions.
/// Every `update` must be a single atomic read-modify-write of the fields
/// present in the patch so concurrent readers never see a half-written job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs, oldest first.
    async fn list(&self) -> StoreResult<Vec<Job>>;

    /// Get a job by ID.
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Register a new job in status `uploaded`.
    async fn create(&self, new_job: NewJob) -> StoreResult<Job>;

    /// Apply a partial patch and return the updated job.
    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job>;
}
