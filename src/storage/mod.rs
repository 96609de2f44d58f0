//! Storage backends for monitoring persistence
//!
//! This module provides a trait-based abstraction over the transactional
//! store holding hosts, monitoring runs, retrieved log entries, detected
//! changes, and content baselines.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: all operations are async for compatibility with the
//!   Tokio-driven pipeline
//! - **Transactional**: one unit of work per monitoring run; the baseline
//!   replacement (deactivate old, insert new) happens inside a single
//!   transaction so at most one baseline per (host, path) is ever active
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database, good for small fleets
//! - **In-Memory**: no persistence, for testing or one-shot runs

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{BaselineUpdate, HealthStatus, StorageBackend, StoredRun};
pub use error::{StorageError, StorageResult};
pub use schema::{
    BaselineRow, ChangeType, DetectedChangeRow, HostRow, LogEntryRow, MonitoringRunRow,
};
