//! Final status for runs that ended without reporting one.

use vchat_models::{Job, JobPatch, JobStatus};
use vchat_process::WorkerExit;

use crate::config::MissingOutputPolicy;

/// Progress written when a run is submitted.
pub const STARTING_PROGRESS: &str = "Starting processing...";
/// Progress for a clean exit with no reported outcome.
pub const FINISHED_PROGRESS: &str = "Processing finished";
/// Progress for a clean exit with no output under [`MissingOutputPolicy::Fail`].
pub const MISSING_OUTPUT_PROGRESS: &str = "Worker exited without reporting an output";
pub const TIMED_OUT_PROGRESS: &str = "Processing timed out";
pub const ABANDONED_PROGRESS: &str = "Processing abandoned";

/// Patch that settles a job after its worker exited.
///
/// Returns `None` unless the job is still `processing`: an outcome the
/// worker reported itself always wins over the exit code.
pub fn reconcile_exit(job: &Job, exit: WorkerExit, policy: MissingOutputPolicy) -> Option<JobPatch> {
    if job.status != JobStatus::Processing {
        return None;
    }

    let patch = if exit.success() {
        if policy == MissingOutputPolicy::Fail && job.output_artifact.is_none() {
            JobPatch::new()
                .status(JobStatus::Error)
                .progress(MISSING_OUTPUT_PROGRESS)
        } else {
            JobPatch::new()
                .status(JobStatus::Completed)
                .progress(FINISHED_PROGRESS)
        }
    } else {
        JobPatch::new()
            .status(JobStatus::Error)
            .progress(failure_progress(exit))
    };

    Some(patch)
}

/// Patch for a run killed after exceeding its time limit.
pub fn reconcile_timeout(job: &Job) -> Option<JobPatch> {
    (job.status == JobStatus::Processing).then(|| {
        JobPatch::new()
            .status(JobStatus::Error)
            .progress(TIMED_OUT_PROGRESS)
    })
}

fn failure_progress(exit: WorkerExit) -> String {
    match exit.code {
        Some(code) => format!("Processing failed (exit code {code})"),
        None => "Processing failed (worker terminated)".to_string(),
    }
}
