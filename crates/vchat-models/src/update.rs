//! Status update lines emitted by workers.
//!
//! A worker prints one JSON object per line on standard output:
//!
//! ```text
//! {"status":"processing","progress":"Detecting silence..."}
//! {"status":"completed","progress":"Done","outputArtifact":"a_out.mp4"}
//! ```
//!
//! Every field is optional. Anything that does not decode to this shape is
//! worker chatter and is never treated as an error.

use serde::Deserialize;

use crate::job::{JobPatch, JobStatus};

/// Statuses a worker is allowed to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Processing,
    Completed,
    Error,
}

impl ReportedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportedStatus::Completed | ReportedStatus::Error)
    }
}

impl From<ReportedStatus> for JobStatus {
    fn from(status: ReportedStatus) -> Self {
        match status {
            ReportedStatus::Processing => JobStatus::Processing,
            ReportedStatus::Completed => JobStatus::Completed,
            ReportedStatus::Error => JobStatus::Error,
        }
    }
}

/// A decoded worker status line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "WireUpdate")]
pub struct StatusUpdate {
    pub status: Option<ReportedStatus>,
    pub progress: Option<String>,
    /// Produced file, under whichever name the worker used
    pub output_artifact: Option<String>,
}

/// Line as printed by the worker.
///
/// Older workers name the produced file `outputFilename` or
/// `processedFilename`, and some print two names at once. When several are
/// set, `outputArtifact` wins over `outputFilename`, which wins over
/// `processedFilename`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpdate {
    #[serde(default)]
    status: Option<ReportedStatus>,
    #[serde(default)]
    progress: Option<String>,
    #[serde(default)]
    output_artifact: Option<String>,
    #[serde(default)]
    output_filename: Option<String>,
    #[serde(default)]
    processed_filename: Option<String>,
}

impl From<WireUpdate> for StatusUpdate {
    fn from(wire: WireUpdate) -> Self {
        Self {
            status: wire.status,
            progress: wire.progress,
            output_artifact: wire
                .output_artifact
                .or(wire.output_filename)
                .or(wire.processed_filename),
        }
    }
}

impl StatusUpdate {
    /// Decode one line of worker output.
    ///
    /// Returns `None` for blank lines, plain text, truncated JSON, JSON
    /// values that are not objects, and objects with an unknown `status`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        if !value.is_object() {
            return None;
        }

        serde_json::from_value(value).ok()
    }

    /// Whether at least one recognized field is present.
    pub fn has_fields(&self) -> bool {
        self.status.is_some() || self.progress.is_some() || self.output_artifact.is_some()
    }

    /// Whether this update ends the run (`completed` or `error`).
    pub fn is_terminal(&self) -> bool {
        self.status.map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Convert into a store patch carrying exactly the present fields.
    pub fn into_patch(self) -> JobPatch {
        let mut patch = JobPatch::new();
        patch.status = self.status.map(JobStatus::from);
        patch.progress = self.progress;
        patch.output_artifact = self.output_artifact;
        patch
    }
}
