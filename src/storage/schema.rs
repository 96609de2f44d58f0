//! Row definitions for the monitoring store
//!
//! One `MonitoringRunRow` is written per host per cycle. The run owns its
//! `LogEntryRow` and `DetectedChangeRow` children (cascade on purge); the
//! host owns its runs and baselines. Rows are write-once, with two
//! exceptions: a run's `alert_sent` flag is flipped after a successful
//! detailed notification, and a baseline's `is_active` flag is cleared when
//! a newer fingerprint replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::{LogRetrieval, RetrievalOutcome};
use crate::config::HostConfig;
use crate::{Analysis, RunStatus, Severity};

/// A monitored host as reconciled into storage from the configuration
/// source. Mutated by the pipeline only through `last_seen` and
/// `last_report_sent`; never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRow {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub enabled: bool,
    pub site: Option<String>,
    pub tags: Vec<String>,
    pub logs: Vec<String>,
    pub report_frequency: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_report_sent: Option<DateTime<Utc>>,
}

impl HostRow {
    /// Build the storage representation of a configured host. Timestamps
    /// start empty; reconciliation preserves existing ones on upsert.
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            name: config.name.clone(),
            hostname: config.hostname.clone(),
            port: config.port,
            user: config.user.clone(),
            enabled: config.enabled,
            site: config.site.clone(),
            tags: config.tags.clone(),
            logs: config.logs.clone(),
            report_frequency: config.report_frequency.clone(),
            last_seen: None,
            last_report_sent: None,
        }
    }
}

/// One execution of the pipeline for one host at one time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRunRow {
    pub host: String,
    pub run_date: DateTime<Utc>,
    pub status: RunStatus,
    /// Wall-clock duration of the run in seconds. For failed runs this is
    /// the elapsed time up to the point of failure.
    pub execution_secs: f64,
    pub error_message: Option<String>,
    pub health_score: Option<u8>,
    pub anomalies_detected: u32,
    pub changes_detected: u32,
    pub alert_level: Severity,
    pub alert_sent: bool,
}

impl MonitoringRunRow {
    pub fn success(
        host: &str,
        run_date: DateTime<Utc>,
        execution_secs: f64,
        analysis: &Analysis,
        changes_detected: u32,
    ) -> Self {
        Self {
            host: host.to_string(),
            run_date,
            status: RunStatus::Success,
            execution_secs,
            error_message: None,
            health_score: Some(analysis.health_score),
            anomalies_detected: 0,
            changes_detected,
            alert_level: analysis.severity,
            alert_sent: false,
        }
    }

    pub fn failed(
        host: &str,
        run_date: DateTime<Utc>,
        execution_secs: f64,
        error_message: String,
    ) -> Self {
        Self {
            host: host.to_string(),
            run_date,
            status: RunStatus::Failed,
            execution_secs,
            error_message: Some(error_message),
            health_score: None,
            anomalies_detected: 0,
            changes_detected: 0,
            alert_level: Severity::Info,
            alert_sent: false,
        }
    }
}

/// One retrieved file's content and metadata, owned by exactly one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryRow {
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub line_count: u64,
    pub file_size: u64,
    pub retrieved_at: DateTime<Utc>,
}

impl LogEntryRow {
    /// Convert a retrieval into a storable entry. Inaccessible and failed
    /// retrievals carry no content and produce no row.
    pub fn from_retrieval(retrieval: &LogRetrieval) -> Option<Self> {
        match &retrieval.outcome {
            RetrievalOutcome::Retrieved {
                content,
                content_hash,
                line_count,
                file_size,
            } => Some(Self {
                path: retrieval.path.clone(),
                content: content.clone(),
                content_hash: content_hash.clone(),
                line_count: *line_count,
                file_size: *file_size,
                retrieved_at: retrieval.retrieved_at,
            }),
            RetrievalOutcome::Inaccessible { .. } | RetrievalOutcome::Failed { .. } => None,
        }
    }
}

/// Content fingerprint of one (host, path) pair used for diffing.
///
/// Invariant: at most one row per (host, path) has `is_active = true` at
/// any time. `StorageBackend::replace_baseline` deactivates the prior
/// active row and inserts the new one within a single unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRow {
    pub host: String,
    pub path: String,
    pub content_hash: String,
    pub line_count: u64,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Kind of change detected against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First sighting of a path with no prior baseline.
    NewLog,
    /// Content hash differs from the active baseline.
    LogModified,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::NewLog => write!(f, "new_log"),
            ChangeType::LogModified => write!(f, "log_modified"),
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_log" => Ok(ChangeType::NewLog),
            "log_modified" => Ok(ChangeType::LogModified),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// A single change event tied to a monitoring run. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedChangeRow {
    pub change_type: ChangeType,
    pub severity: Severity,
    pub description: String,
    pub log_path: Option<String>,
}
