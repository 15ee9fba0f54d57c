//! Registry of live worker runs, at most one per job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

use vchat_models::JobId;
use vchat_process::{RunId, WorkerRun};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::set_active_runs;

/// A registered run.
///
/// The gate is `true` while the run may write to its job. Status merges
/// hold it for reading; abandoning takes it for writing and closes it, so
/// nothing from the run lands after the job was marked abandoned.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    started_at: DateTime<Utc>,
    gate: Arc<RwLock<bool>>,
    done: watch::Receiver<bool>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn gate(&self) -> &RwLock<bool> {
        &self.gate
    }

    /// Wait until the run's driver has finished.
    pub async fn finished(&self) {
        let mut done = self.done.clone();
        // A dropped sender also means the driver is gone.
        let _ = done.wait_for(|done| *done).await;
    }
}

/// A run just registered, with the sender its driver signals on exit.
pub(crate) struct Registration {
    pub run: WorkerRun,
    pub handle: RunHandle,
    pub done: watch::Sender<bool>,
}

/// Active runs keyed by job.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<JobId, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch and register a run for `job_id` in one step.
    ///
    /// The registry lock is held across `launch`, so two concurrent
    /// submissions for the same job cannot both spawn a worker.
    pub(crate) async fn register<F>(&self, job_id: &JobId, launch: F) -> OrchestratorResult<Registration>
    where
        F: FnOnce() -> OrchestratorResult<WorkerRun>,
    {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(job_id) {
            return Err(OrchestratorError::job_busy(job_id.as_str()));
        }

        let run = launch()?;
        let (done, done_rx) = watch::channel(false);
        let handle = RunHandle {
            run_id: run.run_id(),
            started_at: Utc::now(),
            gate: Arc::new(RwLock::new(true)),
            done: done_rx,
        };

        runs.insert(job_id.clone(), handle.clone());
        set_active_runs(runs.len());

        Ok(Registration { run, handle, done })
    }

    /// Remove the entry for `job_id` only if it still belongs to `run_id`.
    pub(crate) async fn remove_run(&self, job_id: &JobId, run_id: RunId) -> bool {
        let mut runs = self.runs.lock().await;
        let owned = runs.get(job_id).map(|h| h.run_id == run_id).unwrap_or(false);
        if owned {
            runs.remove(job_id);
            set_active_runs(runs.len());
        }
        owned
    }

    /// Lock the registry for a multi-step change.
    ///
    /// No run can be registered or removed while the guard is held.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<JobId, RunHandle>> {
        self.runs.lock().await
    }

    pub async fn get(&self, job_id: &JobId) -> Option<RunHandle> {
        self.runs.lock().await.get(job_id).cloned()
    }

    pub async fn contains(&self, job_id: &JobId) -> bool {
        self.runs.lock().await.contains_key(job_id)
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Jobs with a live run, sorted.
    pub async fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.runs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
