//! Orchestrator metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const RUNS_STARTED_TOTAL: &str = "vchat_runs_started_total";
    pub const RUNS_FINISHED_TOTAL: &str = "vchat_runs_finished_total";
    pub const RUNS_ACTIVE: &str = "vchat_runs_active";
    pub const RUN_DURATION_SECONDS: &str = "vchat_run_duration_seconds";
    pub const LAUNCH_FAILURES_TOTAL: &str = "vchat_launch_failures_total";
    pub const STATUS_LINES_TOTAL: &str = "vchat_status_lines_total";
}

/// How a run ended, as recorded in `vchat_runs_finished_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Worker reported `completed` itself
    Completed,
    /// Worker reported `error` itself
    Failed,
    /// Exit code decided the outcome
    Reconciled,
    TimedOut,
    Abandoned,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed => "failed",
            RunOutcome::Reconciled => "reconciled",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::Abandoned => "abandoned",
        }
    }
}

pub fn record_run_started() {
    counter!(names::RUNS_STARTED_TOTAL).increment(1);
}

pub fn record_run_finished(outcome: RunOutcome, elapsed: Duration) {
    let labels = [("outcome", outcome.as_str().to_string())];
    counter!(names::RUNS_FINISHED_TOTAL, &labels).increment(1);
    histogram!(names::RUN_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

pub fn record_launch_failure() {
    counter!(names::LAUNCH_FAILURES_TOTAL).increment(1);
}

pub fn set_active_runs(count: usize) {
    gauge!(names::RUNS_ACTIVE).set(count as f64);
}

/// Record one stdout line; `applied` is false for lines that were not updates.
pub fn record_status_line(applied: bool) {
    let outcome = if applied { "applied" } else { "ignored" };
    counter!(names::STATUS_LINES_TOTAL, "outcome" => outcome).increment(1);
}
