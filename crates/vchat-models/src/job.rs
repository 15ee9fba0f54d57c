//! Job records tracked by the record store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::schema::RootSchema;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Progress text shown for a freshly registered upload.
pub const READY_PROGRESS: &str = "Ready to process";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// `uploaded` is initial, `completed` and `error` are terminal. A terminal
/// job re-enters `processing` only through an explicit resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Source file registered, no run yet
    #[default]
    Uploaded,
    /// A worker run is in progress
    Processing,
    /// Last run finished successfully
    Completed,
    /// Last run failed, crashed, timed out or was abandoned
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a status string is not a known [`JobStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One uploaded video and the state of its latest transformation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID, immutable
    pub id: JobId,

    /// Name of the file as the user uploaded it
    pub original_name: String,

    /// Stored filename of the input video, immutable
    pub source_artifact: String,

    /// Filename of the produced video, set by the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_artifact: Option<String>,

    /// Current status
    pub status: JobStatus,

    /// Human-readable progress message (last writer wins)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,

    /// Creation timestamp, never mutated
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job for an uploaded file.
    pub fn new(source_artifact: impl Into<String>, original_name: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::new(),
            original_name: original_name.into(),
            source_artifact: source_artifact.into(),
            output_artifact: None,
            status: JobStatus::Uploaded,
            progress: Some(READY_PROGRESS.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied atomically to a [`Job`].
///
/// Only fields that are present are written. A patch never clears the
/// output artifact, except the one built by [`JobPatch::restart`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<String>,
    pub output_artifact: Option<String>,
    clear_output_artifact: bool,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that starts a new run: `processing`, fresh progress text, and
    /// no output artifact left over from a previous run.
    pub fn restart(progress: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress.into()),
            output_artifact: None,
            clear_output_artifact: true,
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }

    pub fn output_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.output_artifact = Some(artifact.into());
        self
    }

    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.output_artifact.is_none()
            && !self.clear_output_artifact
    }

    /// Whether this patch resets the output artifact.
    pub fn clears_output_artifact(&self) -> bool {
        self.clear_output_artifact
    }

    /// Write the present fields into `job` and bump `updated_at`.
    pub fn apply_to(&self, job: &mut Job) {
        if self.clear_output_artifact {
            job.output_artifact = None;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(ref progress) = self.progress {
            job.progress = Some(progress.clone());
        }
        if let Some(ref artifact) = self.output_artifact {
            job.output_artifact = Some(artifact.clone());
        }
        job.updated_at = Utc::now();
    }
}

/// JSON Schema of the job record as clients receive it.
pub fn job_schema() -> RootSchema {
    schema_for!(Job)
}
