//! Job record store.
//!
//! This crate provides:
//! - The `JobStore` trait consumed by the orchestrator and gateway
//! - An in-memory implementation with atomic patch updates
//! - Store operation metrics

pub mod error;
pub mod memory;
pub mod metrics;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use store::{JobStore, NewJob};
