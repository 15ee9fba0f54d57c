//! Per-run log context.
//!
//! Output of many workers interleaves in one log. Every event emitted here
//! carries the job ID and run ID, and the driver task runs inside the span
//! from [`JobLogger::span`], so one run can be followed from launch to its
//! final status.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use vchat_models::{JobId, JobStatus};
use vchat_process::{RunId, WorkerExit};

use crate::metrics::RunOutcome;

/// Log context of one worker run.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    run_id: RunId,
}

impl JobLogger {
    pub fn new(job_id: &JobId, run_id: RunId) -> Self {
        Self {
            job_id: job_id.clone(),
            run_id,
        }
    }

    /// Worker spawned and the job marked processing.
    pub fn launched(&self, command: &str, pid: Option<u32>) {
        info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            pid = ?pid,
            command,
            "Worker launched"
        );
    }

    /// Progress text the worker reported and the store accepted.
    pub fn progress(&self, progress: &str) {
        info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            progress,
            "Worker progress"
        );
    }

    /// The worker reported `completed` or `error` itself.
    pub fn reported(&self, status: JobStatus) {
        info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            status = %status,
            "Worker reported outcome"
        );
    }

    pub fn exited(&self, exit: WorkerExit) {
        info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            exit = %exit,
            "Worker exited without reporting an outcome"
        );
    }

    /// The run is over and its job holds its final status.
    pub fn settled(&self, outcome: RunOutcome, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            run_id = %self.run_id,
            outcome = outcome.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Run settled"
        );
    }

    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, run_id = %self.run_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(job_id = %self.job_id, run_id = %self.run_id, "{}", message);
    }

    /// Span the run's driver task is instrumented with.
    pub fn span(&self) -> Span {
        tracing::info_span!("worker_run", job_id = %self.job_id, run_id = %self.run_id)
    }
}
