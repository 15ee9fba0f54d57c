//! Orchestrator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vchat_process::{WorkerCommand, WorkerLauncher};

use crate::error::OrchestratorError;

/// What to do when a worker exits 0 without ever reporting an output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingOutputPolicy {
    /// Mark the job completed with no output artifact
    #[default]
    Complete,
    /// Mark the job as failed
    Fail,
}

impl FromStr for MissingOutputPolicy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" => Ok(MissingOutputPolicy::Complete),
            "fail" | "error" => Ok(MissingOutputPolicy::Fail),
            other => Err(OrchestratorError::config(format!(
                "unknown missing output policy: {other}"
            ))),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker executable
    pub worker_program: String,
    /// Arguments placed before `<jobId> <source> <command>`
    pub worker_args: Vec<String>,
    /// Working directory for workers (defaults to the server's)
    pub worker_workdir: Option<PathBuf>,
    /// Kill a worker that runs longer than this
    pub run_timeout: Option<Duration>,
    /// Outcome for a clean exit that produced no output artifact
    pub missing_output: MissingOutputPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_program: "python3".to_string(),
            worker_args: vec!["worker/processor.py".to_string()],
            worker_workdir: None,
            run_timeout: None,
            missing_output: MissingOutputPolicy::Complete,
        }
    }
}

impl OrchestratorConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            worker_program: std::env::var("WORKER_PROGRAM")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.worker_program),
            worker_args: std::env::var("WORKER_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.worker_args),
            worker_workdir: std::env::var("WORKER_WORKDIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            run_timeout: std::env::var("WORKER_RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            missing_output: std::env::var("WORKER_MISSING_OUTPUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.missing_output),
        }
    }

    /// Command for the configured worker.
    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand::new(self.worker_program.clone()).leading_args(self.worker_args.iter().cloned())
    }

    /// Launcher for the configured worker.
    pub fn launcher(&self) -> WorkerLauncher {
        let launcher = WorkerLauncher::new(self.worker_command());
        match self.worker_workdir {
            Some(ref dir) => launcher.with_working_dir(dir),
            None => launcher,
        }
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_missing_output(mut self, policy: MissingOutputPolicy) -> Self {
        self.missing_output = policy;
        self
    }
}
