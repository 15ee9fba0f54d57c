//! Status update merger.
//!
//! Turns one raw worker line into at most one partial store write. Lines
//! that are not status updates are dropped here and never reach the store.

use std::sync::Arc;

use tracing::debug;

use vchat_models::{JobId, JobStatus, StatusUpdate};
use vchat_store::JobStore;

use crate::error::OrchestratorResult;
use crate::metrics::record_status_line;

/// Result of merging one worker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The line was an update and the job was patched
    Applied {
        /// Job status after the patch
        status: JobStatus,
        /// Whether the update reported `completed` or `error`
        terminal: bool,
        /// Progress text the update carried, if any
        progress: Option<String>,
    },
    /// Not an update (plain text, bad JSON, unknown status, no known fields)
    Ignored,
}

/// Applies worker status lines to the job store.
#[derive(Clone)]
pub struct StatusMerger {
    store: Arc<dyn JobStore>,
}

impl StatusMerger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Merge one line of worker output into `job_id`'s record.
    ///
    /// Only fields present in the update are written; absent fields keep
    /// their stored values. Errors come from the store only.
    pub async fn apply(&self, job_id: &JobId, line: &str) -> OrchestratorResult<MergeOutcome> {
        let update = match StatusUpdate::parse_line(line) {
            Some(update) if update.has_fields() => update,
            _ => {
                debug!(job_id = %job_id, "Worker output: {}", line);
                record_status_line(false);
                return Ok(MergeOutcome::Ignored);
            }
        };

        let terminal = update.is_terminal();
        let progress = update.progress.clone();
        let job = self.store.update(job_id, update.into_patch()).await?;
        record_status_line(true);

        debug!(
            job_id = %job_id,
            status = %job.status,
            progress = ?job.progress,
            "Applied worker status update"
        );

        Ok(MergeOutcome::Applied {
            status: job.status,
            terminal,
            progress,
        })
    }
}
