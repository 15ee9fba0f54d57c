//! Application state.

use std::sync::Arc;

use vchat_orchestrator::{JobOrchestrator, OrchestratorConfig};
use vchat_store::{InMemoryJobStore, JobStore};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl AppState {
    /// Create state backed by an in-memory job store.
    pub fn new(config: ApiConfig, orchestrator_config: OrchestratorConfig) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let orchestrator = JobOrchestrator::new(Arc::clone(&store), orchestrator_config);
        Self::from_parts(config, store, orchestrator)
    }

    /// Create state around an existing store and orchestrator.
    ///
    /// The orchestrator must write to the same store.
    pub fn from_parts(config: ApiConfig, store: Arc<dyn JobStore>, orchestrator: JobOrchestrator) -> Self {
        Self {
            config,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
