//! Shared data models for the VChat editing backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Partial job patches applied to the record store
//! - The status update lines workers print on standard output

pub mod job;
pub mod update;

// Re-export common types
pub use job::{job_schema, Job, JobId, JobPatch, JobStatus, ParseStatusError};
pub use update::{ReportedStatus, StatusUpdate};
