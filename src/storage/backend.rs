//! Storage backend trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{BaselineRow, DetectedChangeRow, HostRow, LogEntryRow, MonitoringRunRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// A monitoring run together with its storage-assigned identifier.
#[derive(Debug, Clone)]
pub struct StoredRun {
    pub id: i64,
    pub run: MonitoringRunRow,
}

/// One baseline replacement recorded as part of a run's unit of work.
#[derive(Debug, Clone)]
pub struct BaselineUpdate {
    pub path: String,
    pub content_hash: String,
    pub line_count: u64,
}

/// Trait for persistent monitoring storage
///
/// All backends (SQLite, in-memory) implement this trait. Implementations
/// must be `Send + Sync` as they are shared across the per-host worker
/// tasks of a cycle via `Arc`.
///
/// ## Transaction boundary
///
/// `persist_run` is the unit of work for a successful pipeline execution:
/// the run row, its log entries and detected changes, and the baseline
/// replacements from the same batch commit together or not at all, so a
/// storage fault can never leave a run row with missing children.
/// `replace_baseline` carries the same invariant for standalone
/// replacements: deactivating the prior active baseline and inserting the
/// new one happen in a single unit of work.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or update a host from the configuration source.
    ///
    /// Reconciliation overwrites configuration-derived fields but must
    /// preserve `last_seen` and `last_report_sent` on existing rows.
    async fn upsert_host(&self, host: HostRow) -> StorageResult<()>;

    /// All hosts with `enabled = true`.
    async fn enabled_hosts(&self) -> StorageResult<Vec<HostRow>>;

    /// Look up a single host by name.
    async fn get_host(&self, name: &str) -> StorageResult<Option<HostRow>>;

    /// Insert a run row with no children. Used for failed runs, which
    /// have no retrievals, changes, or baselines to record.
    async fn insert_run(&self, run: MonitoringRunRow) -> StorageResult<i64>;

    /// Persist one successful pipeline execution as a single unit of
    /// work: the run, its log entries and detected changes, and the
    /// baseline replacements from the same batch. Returns the run's
    /// storage-assigned id. Children are write-once.
    async fn persist_run(
        &self,
        run: MonitoringRunRow,
        entries: Vec<LogEntryRow>,
        changes: Vec<DetectedChangeRow>,
        baselines: Vec<BaselineUpdate>,
    ) -> StorageResult<i64>;

    /// Flip a run's `alert_sent` flag after a successful detailed
    /// notification. The only post-insert mutation a run permits.
    async fn mark_alert_sent(&self, run_id: i64) -> StorageResult<()>;

    /// The currently active baseline for (host, path), if any.
    async fn active_baseline(&self, host: &str, path: &str) -> StorageResult<Option<BaselineRow>>;

    /// Atomically deactivate the prior active baseline for (host, path)
    /// and insert a new active one.
    async fn replace_baseline(
        &self,
        host: &str,
        path: &str,
        content_hash: &str,
        line_count: u64,
    ) -> StorageResult<()>;

    /// Update the host's `last_seen` timestamp.
    async fn touch_last_seen(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Update the host's `last_report_sent` timestamp.
    async fn touch_last_report(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// When the last site-level aggregate report went out, if ever.
    async fn last_site_report(&self, site: &str) -> StorageResult<Option<DateTime<Utc>>>;

    /// Record a successful site-level report send.
    async fn touch_site_report(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Most recent runs for a host, newest first.
    async fn runs_for_host(&self, host: &str, limit: usize) -> StorageResult<Vec<StoredRun>>;

    /// Log entries attached to a run.
    async fn log_entries_for_run(&self, run_id: i64) -> StorageResult<Vec<LogEntryRow>>;

    /// Detected changes attached to a run.
    async fn changes_for_run(&self, run_id: i64) -> StorageResult<Vec<DetectedChangeRow>>;

    /// Every baseline row (active and inactive) for (host, path), oldest
    /// first. Diagnostic surface for verifying the single-active invariant.
    async fn baseline_history(&self, host: &str, path: &str) -> StorageResult<Vec<BaselineRow>>;

    /// Check backend health with a lightweight operation.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources.
    async fn close(&self) -> StorageResult<()>;
}
