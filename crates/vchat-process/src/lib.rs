//! Worker process adapter.
//!
//! This crate provides:
//! - Worker invocation (`<program> <jobId> <source> <command>`)
//! - A lazy, ordered event sequence per run: stdout lines, then one exit event
//! - stderr draining into the log

pub mod command;
pub mod error;
pub mod run;

pub use command::{WorkerCommand, WorkerLauncher};
pub use error::{ProcessError, ProcessResult};
pub use run::{RunId, WorkerEvent, WorkerExit, WorkerRun, MAX_LINE_BYTES};
