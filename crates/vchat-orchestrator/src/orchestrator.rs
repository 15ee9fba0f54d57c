//! Job orchestrator.
//!
//! Owns the lifecycle of worker runs: submission, live status merging,
//! exit reconciliation, timeouts and abandonment.
//!
//! ```text
//! uploaded ──submit──▶ processing ──worker/exit──▶ completed | error
//!                          ▲                              │
//!                          └──────────submit──────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use vchat_models::{Job, JobId, JobPatch, JobStatus};
use vchat_process::{ProcessResult, RunId, WorkerEvent, WorkerExit, WorkerLauncher, WorkerRun};
use vchat_store::JobStore;

use crate::config::{MissingOutputPolicy, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::JobLogger;
use crate::merger::{MergeOutcome, StatusMerger};
use crate::metrics::{
    record_launch_failure, record_run_finished, record_run_started, set_active_runs, RunOutcome,
};
use crate::reconcile::{reconcile_exit, reconcile_timeout, ABANDONED_PROGRESS, STARTING_PROGRESS};
use crate::registry::{Registration, RunHandle, RunRegistry};

/// Message returned with every accepted submission.
pub const PROCESSING_STARTED: &str = "Processing started";

/// Acknowledgement of an accepted submission.
///
/// The run's outcome is only observable by polling the job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitAck {
    pub job_id: JobId,
    pub run_id: RunId,
    pub status: JobStatus,
    pub message: String,
}

/// Drives worker runs and keeps job records in step with them.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    launcher: WorkerLauncher,
    merger: StatusMerger,
    registry: Arc<RunRegistry>,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    /// Create an orchestrator launching the worker named in `config`.
    pub fn new(store: Arc<dyn JobStore>, config: OrchestratorConfig) -> Self {
        let launcher = config.launcher();
        Self::with_launcher(store, launcher, config)
    }

    /// Create an orchestrator with an explicit launcher.
    pub fn with_launcher(store: Arc<dyn JobStore>, launcher: WorkerLauncher, config: OrchestratorConfig) -> Self {
        Self {
            merger: StatusMerger::new(Arc::clone(&store)),
            store,
            launcher,
            registry: Arc::new(RunRegistry::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn launcher(&self) -> &WorkerLauncher {
        &self.launcher
    }

    /// Check that the worker program can be found.
    pub fn check_worker(&self) -> ProcessResult<PathBuf> {
        self.launcher.resolve_program()
    }

    /// Start a worker run transforming `job_id` according to `command`.
    ///
    /// Returns once the worker is spawned and the job is `processing`; the
    /// run itself continues in the background. Fails with `JobBusy` while
    /// the job already has a live run, with `LaunchFailure` (leaving the
    /// job untouched) if the process cannot be created, and with `Abandoned`
    /// if an abandon got in before the job was marked processing.
    pub async fn submit(&self, job_id: &JobId, command: &str) -> OrchestratorResult<SubmitAck> {
        if command.trim().is_empty() {
            return Err(OrchestratorError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }

        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(job_id.as_str()))?;

        let registration = self
            .registry
            .register(job_id, || {
                self.launcher
                    .launch(job_id, &job.source_artifact, command)
                    .map_err(|e| {
                        record_launch_failure();
                        OrchestratorError::from(e)
                    })
            })
            .await?;

        self.start_run(job_id, command, registration).await
    }

    /// Mark the job processing and hand a registered run to its driver.
    ///
    /// Fails with `Abandoned` if the run was abandoned between registration
    /// and the restart write; the worker is killed and the job left as the
    /// abandon found it.
    async fn start_run(
        &self,
        job_id: &JobId,
        command: &str,
        registration: Registration,
    ) -> OrchestratorResult<SubmitAck> {
        let Registration { mut run, handle, done } = registration;
        let run_id = run.run_id();
        let logger = JobLogger::new(job_id, run_id);

        let started = match self.mark_started(job_id, &handle).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(OrchestratorError::abandoned(job_id.as_str())),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            logger.error(&format!("Run not started: {}", e));
            if let Err(kill_err) = run.kill().await {
                logger.warning(&format!("Failed to kill worker: {}", kill_err));
            }
            self.registry.remove_run(job_id, run_id).await;
            done.send_replace(true);
            return Err(e);
        }

        record_run_started();
        logger.launched(command, run.pid());

        let driver = RunDriver {
            job_id: job_id.clone(),
            handle,
            store: Arc::clone(&self.store),
            merger: self.merger.clone(),
            registry: Arc::clone(&self.registry),
            run_timeout: self.config.run_timeout,
            missing_output: self.config.missing_output,
            logger: logger.clone(),
            done,
        };
        tokio::spawn(driver.drive(run).instrument(logger.span()));

        Ok(SubmitAck {
            job_id: job_id.clone(),
            run_id,
            status: JobStatus::Processing,
            message: PROCESSING_STARTED.to_string(),
        })
    }

    /// Write the restart patch while the run's gate is open.
    ///
    /// Returns false without writing if the run was already abandoned.
    async fn mark_started(&self, job_id: &JobId, handle: &RunHandle) -> OrchestratorResult<bool> {
        let gate = handle.gate().read().await;
        if !*gate {
            return Ok(false);
        }
        self.store
            .update(job_id, JobPatch::restart(STARTING_PROGRESS))
            .await?;
        Ok(true)
    }

    /// Give up on the live run of `job_id` and mark the job failed.
    ///
    /// The worker process is left alone; its remaining output is drained
    /// and discarded. If the run already settled the job, or had not yet
    /// marked it processing, the job is returned unchanged.
    pub async fn abandon(&self, job_id: &JobId) -> OrchestratorResult<Job> {
        if self.store.get(job_id).await?.is_none() {
            return Err(OrchestratorError::not_found(job_id.as_str()));
        }

        // Held until the abandoned status is written: a resubmission cannot
        // register its run, and so cannot mark the job processing, before
        // this run's verdict is in the store.
        let mut runs = self.registry.lock().await;
        let handle = runs
            .remove(job_id)
            .ok_or_else(|| OrchestratorError::not_running(job_id.as_str()))?;
        set_active_runs(runs.len());

        let mut gate = handle.gate().write().await;
        *gate = false;

        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(job_id.as_str()))?;
        if job.status != JobStatus::Processing {
            debug!(job_id = %job_id, status = %job.status, "Abandoned run had no processing job to fail");
            return Ok(job);
        }

        let job = self
            .store
            .update(
                job_id,
                JobPatch::new()
                    .status(JobStatus::Error)
                    .progress(ABANDONED_PROGRESS),
            )
            .await?;
        drop(gate);
        drop(runs);

        warn!(
            job_id = %job_id,
            run_id = %handle.run_id(),
            started_at = %handle.started_at(),
            "Run abandoned"
        );
        Ok(job)
    }

    /// Whether `job_id` has a live run.
    pub async fn is_running(&self, job_id: &JobId) -> bool {
        self.registry.contains(job_id).await
    }

    /// Number of live runs.
    pub async fn active_runs(&self) -> usize {
        self.registry.len().await
    }

    /// Jobs that currently have a live run.
    pub async fn running_jobs(&self) -> Vec<JobId> {
        self.registry.job_ids().await
    }

    /// Wait for the live run of `job_id`, if any, to finish.
    pub async fn wait_for_run(&self, job_id: &JobId) {
        if let Some(handle) = self.registry.get(job_id).await {
            handle.finished().await;
        }
    }

    /// Wait for every live run to finish, up to `timeout`.
    ///
    /// Returns false if runs were still active when the timeout elapsed.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let wait_all = async {
            loop {
                let ids = self.registry.job_ids().await;
                if ids.is_empty() {
                    break;
                }
                for id in ids {
                    self.wait_for_run(&id).await;
                }
            }
        };
        tokio::time::timeout(timeout, wait_all).await.is_ok()
    }
}

enum RunEnd {
    Exited(WorkerExit),
    TimedOut,
}

/// Background task following one run to its end.
struct RunDriver {
    job_id: JobId,
    handle: RunHandle,
    store: Arc<dyn JobStore>,
    merger: StatusMerger,
    registry: Arc<RunRegistry>,
    run_timeout: Option<Duration>,
    missing_output: MissingOutputPolicy,
    logger: JobLogger,
    done: watch::Sender<bool>,
}

impl RunDriver {
    async fn drive(self, mut run: WorkerRun) {
        let started = Instant::now();
        let deadline = self.run_timeout.map(|timeout| started + timeout);
        // Terminal status the worker reported; later lines are drained only.
        let mut reported: Option<JobStatus> = None;

        let end = loop {
            let event = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, run.next_event()).await {
                    Ok(event) => event,
                    Err(_) => {
                        if let Err(e) = run.kill().await {
                            self.logger.warning(&format!("Failed to kill worker: {}", e));
                        }
                        break RunEnd::TimedOut;
                    }
                },
                None => run.next_event().await,
            };

            match event {
                Some(WorkerEvent::Line(line)) => {
                    if reported.is_some() {
                        debug!("Ignoring worker output after terminal update: {}", line);
                        continue;
                    }
                    reported = self.merge_line(&line).await;
                }
                Some(WorkerEvent::Exited(exit)) => break RunEnd::Exited(exit),
                None => break RunEnd::Exited(WorkerExit { code: None }),
            }
        };

        let outcome = self.finish(end, reported).await;
        let elapsed = started.elapsed();
        record_run_finished(outcome, elapsed);
        self.logger.settled(outcome, elapsed);

        self.registry.remove_run(&self.job_id, self.handle.run_id()).await;
        self.done.send_replace(true);
    }

    /// Apply one line; returns the status if the worker reported an outcome.
    async fn merge_line(&self, line: &str) -> Option<JobStatus> {
        let gate = self.handle.gate().read().await;
        if !*gate {
            return None;
        }

        match self.merger.apply(&self.job_id, line).await {
            Ok(MergeOutcome::Applied { status, terminal, progress }) => {
                if let Some(progress) = progress {
                    self.logger.progress(&progress);
                }
                if terminal {
                    self.logger.reported(status);
                    Some(status)
                } else {
                    None
                }
            }
            Ok(MergeOutcome::Ignored) => None,
            Err(e) => {
                self.logger.error(&format!("Failed to apply status update: {}", e));
                None
            }
        }
    }

    async fn finish(&self, end: RunEnd, reported: Option<JobStatus>) -> RunOutcome {
        let gate = self.handle.gate().read().await;
        if !*gate {
            self.logger.warning("Run was abandoned, discarding its result");
            return RunOutcome::Abandoned;
        }

        if let Some(status) = reported {
            if let RunEnd::TimedOut = end {
                self.logger.warning("Worker killed after run timeout, keeping reported outcome");
            }
            return match status {
                JobStatus::Completed => RunOutcome::Completed,
                _ => RunOutcome::Failed,
            };
        }

        let job = match self.store.get(&self.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.logger.error("Job record disappeared during run");
                return RunOutcome::Reconciled;
            }
            Err(e) => {
                self.logger.error(&format!("Failed to load job for reconciliation: {}", e));
                return RunOutcome::Reconciled;
            }
        };

        let (patch, outcome) = match end {
            RunEnd::TimedOut => {
                self.logger.error("Worker exceeded run timeout and was killed");
                (reconcile_timeout(&job), RunOutcome::TimedOut)
            }
            RunEnd::Exited(exit) => {
                self.logger.exited(exit);
                (reconcile_exit(&job, exit, self.missing_output), RunOutcome::Reconciled)
            }
        };

        if let Some(patch) = patch {
            if let Err(e) = self.store.update(&self.job_id, patch).await {
                self.logger.error(&format!("Failed to write final status: {}", e));
            }
        }
        outcome
    }
}
