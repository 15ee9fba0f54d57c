//! In-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use vchat_models::{Job, JobId, JobPatch};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_operation;
use crate::store::{JobStore, NewJob};

/// Job store backed by a `HashMap` behind an async `RwLock`.
///
/// Patches are applied while holding the write lock, so readers see either
/// the previous or the fully patched record.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        record_operation("list", true);
        Ok(jobs)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let job = self.jobs.read().await.get(id).cloned();
        record_operation("get", true);
        Ok(job)
    }

    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        if let Err(e) = new_job.validate() {
            record_operation("create", false);
            return Err(e);
        }

        let job = Job::new(new_job.source_artifact, new_job.original_name);
        self.jobs.write().await.insert(job.id.clone(), job.clone());

        record_operation("create", true);
        info!(job_id = %job.id, source = %job.source_artifact, "Created job record");
        Ok(job)
    }

    async fn update(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            record_operation("update", false);
            return Err(StoreError::not_found(id.as_str()));
        };

        patch.apply_to(job);
        record_operation("update", true);
        debug!(
            job_id = %id,
            status = %job.status,
            progress = ?job.progress,
            output = ?job.output_artifact,
            "Patched job record"
        );
        Ok(job.clone())
    }
}
