//! Worker command builder and launcher.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use vchat_models::JobId;

use crate::error::{ProcessError, ProcessResult};
use crate::run::{WorkerRun, MAX_LINE_BYTES};

/// The worker executable plus any arguments that precede the job arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable name or path
    program: String,
    /// Arguments placed before `<jobId> <source> <command>`
    leading_args: Vec<String>,
}

impl WorkerCommand {
    /// Create a command for a worker executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Add an argument before the job arguments (e.g. an interpreter script).
    pub fn leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Add multiple leading arguments.
    pub fn leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the full argument list for one job run.
    pub fn build_args(&self, job_id: &JobId, source_artifact: &str, command: &str) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(job_id.to_string());
        args.push(source_artifact.to_string());
        args.push(command.to_string());
        args
    }
}

/// Spawns one worker process per job run.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    command: WorkerCommand,
    working_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    max_line_len: usize,
}

impl WorkerLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            working_dir: None,
            envs: Vec::new(),
            max_line_len: MAX_LINE_BYTES,
        }
    }

    /// Run workers from this directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for every worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Drop output lines longer than `bytes` instead of buffering them.
    pub fn with_max_line_len(mut self, bytes: usize) -> Self {
        self.max_line_len = bytes.max(1);
        self
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Resolve the worker program the way the OS would on spawn.
    pub fn resolve_program(&self) -> ProcessResult<PathBuf> {
        let program = self.command.program();
        let resolved = match self.working_dir {
            Some(ref dir) => which::which_in(program, std::env::var_os("PATH"), dir),
            None => which::which(program),
        };
        resolved.map_err(|_| ProcessError::ProgramNotFound(program.to_string()))
    }

    /// Spawn a worker for `job_id`.
    ///
    /// Fails synchronously with [`ProcessError::LaunchFailure`] if the
    /// process cannot be created. A worker that starts and then exits
    /// nonzero is not an error here; it shows up as the run's exit event.
    pub fn launch(&self, job_id: &JobId, source_artifact: &str, command: &str) -> ProcessResult<WorkerRun> {
        if command.trim().is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        let args = self.command.build_args(job_id, source_artifact, command);
        debug!(job_id = %job_id, "Launching worker: {} {}", self.command.program(), args.join(" "));

        let mut cmd = Command::new(self.command.program());
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            warn!(job_id = %job_id, program = %self.command.program(), error = %e, "Worker spawn failed");
            ProcessError::launch_failure(self.command.program(), e)
        })?;

        let run = WorkerRun::new(job_id.clone(), child, self.max_line_len);
        info!(
            job_id = %job_id,
            run_id = %run.run_id(),
            pid = ?run.pid(),
            "Worker launched"
        );
        Ok(run)
    }
}
