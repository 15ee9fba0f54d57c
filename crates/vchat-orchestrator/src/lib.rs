//! Job orchestration.
//!
//! This crate provides:
//! - The status update merger (worker line -> partial store write)
//! - The job orchestrator state machine with its active-run registry
//! - Exit-code reconciliation for workers that never report an outcome
//! - Structured per-run logging and metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod merger;
pub mod metrics;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;

pub use config::{MissingOutputPolicy, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use logging::JobLogger;
pub use merger::{MergeOutcome, StatusMerger};
pub use orchestrator::{JobOrchestrator, SubmitAck};
pub use reconcile::{reconcile_exit, reconcile_timeout};
pub use registry::{RunHandle, RunRegistry};
