//! Per-path and collaborator faults must degrade, never abort

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logvigil::analysis::{Analyzer, AnalysisUnavailable, BasicAnalyzer};
use logvigil::alerts::AlertRouter;
use logvigil::collector::LogRetrieval;
use logvigil::reports::{PlainTextRenderer, ReportScheduler};
use logvigil::config::ReportingConfig;
use logvigil::pipeline::HostPipeline;
use logvigil::storage::memory::MemoryBackend;
use logvigil::storage::{
    BaselineRow, BaselineUpdate, DetectedChangeRow, HealthStatus, HostRow, LogEntryRow,
    MonitoringRunRow, StorageBackend, StorageError, StorageResult, StoredRun,
};
use logvigil::{Analysis, RunStatus};

use crate::helpers::{fixture, host_config, ScriptedShell, COMMAND_TIMEOUT};

#[tokio::test]
async fn test_one_unreadable_path_never_aborts_the_batch() {
    let f = fixture();
    let config = host_config(
        "web-1",
        &["/var/log/a.log", "/var/log/b.log", "/var/log/c.log"],
    );
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    // b.log passes the probe but fails mid-read.
    let shell = ScriptedShell::new()
        .with_file("/var/log/a.log", "aa\n")
        .with_file("/var/log/b.log", "bb\n")
        .with_file("/var/log/c.log", "cc\n")
        .failing_read("/var/log/b.log");

    let result = f
        .pipeline
        .run(&host, Box::new(shell), COMMAND_TIMEOUT)
        .await;

    // The run still succeeds; the mid-read fault shows up in the score.
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.changes_detected, 2);

    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs[0].run.health_score, Some(85));

    let entries = f.storage.log_entries_for_run(runs[0].id).await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/var/log/a.log", "/var/log/c.log"]);

    assert!(f
        .storage
        .active_baseline("web-1", "/var/log/b.log")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_empty_glob_expansion_yields_no_results() {
    let f = fixture();
    let config = host_config(
        "web-1",
        &["/var/log/a.log", "/nope/*.log", "/var/log/b.log"],
    );
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new()
        .with_file("/var/log/a.log", "aa\n")
        .with_file("/var/log/b.log", "bb\n");

    let result = f
        .pipeline
        .run(&host, Box::new(shell), COMMAND_TIMEOUT)
        .await;

    assert_eq!(result.status, RunStatus::Success);
    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    let entries = f.storage.log_entries_for_run(runs[0].id).await.unwrap();
    assert_eq!(entries.len(), 2);
}

struct BrokenAnalyzer;

#[async_trait]
impl Analyzer for BrokenAnalyzer {
    async fn analyze(
        &self,
        _host: &HostRow,
        _retrievals: &[LogRetrieval],
        _prior_baseline_hash: Option<&str>,
    ) -> Result<Analysis, AnalysisUnavailable> {
        Err(AnalysisUnavailable("model endpoint unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_analyzer_outage_degrades_to_fallback() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let scheduler = Arc::new(ReportScheduler::new(
        storage.clone(),
        Arc::new(PlainTextRenderer),
        None,
        vec![],
        ReportingConfig::default(),
    ));
    let pipeline = HostPipeline::new(
        storage.clone(),
        Arc::new(BrokenAnalyzer),
        Arc::new(AlertRouter::new(None, None, vec![])),
        scheduler,
        3,
    );

    let config = host_config("web-1", &["/var/log/syslog"]);
    let host = HostRow::from_config(&config);
    storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new().with_file("/var/log/syslog", "ok\n");
    let result = pipeline.run(&host, Box::new(shell), COMMAND_TIMEOUT).await;

    assert_eq!(result.status, RunStatus::Success);

    let runs = storage.runs_for_host("web-1", 10).await.unwrap();
    let fallback = Analysis::fallback();
    assert_eq!(runs[0].run.health_score, Some(fallback.health_score));
    assert_eq!(runs[0].run.alert_level, fallback.severity);

    // Persistence still happened in full despite the outage.
    assert!(storage
        .active_baseline("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .is_some());
}

/// Delegates to a memory backend but rejects the run-persistence unit of
/// work, standing in for a storage fault at commit time.
struct FaultyStorage {
    inner: MemoryBackend,
}

#[async_trait]
impl StorageBackend for FaultyStorage {
    async fn upsert_host(&self, host: HostRow) -> StorageResult<()> {
        self.inner.upsert_host(host).await
    }

    async fn enabled_hosts(&self) -> StorageResult<Vec<HostRow>> {
        self.inner.enabled_hosts().await
    }

    async fn get_host(&self, name: &str) -> StorageResult<Option<HostRow>> {
        self.inner.get_host(name).await
    }

    async fn insert_run(&self, run: MonitoringRunRow) -> StorageResult<i64> {
        self.inner.insert_run(run).await
    }

    async fn persist_run(
        &self,
        _run: MonitoringRunRow,
        _entries: Vec<LogEntryRow>,
        _changes: Vec<DetectedChangeRow>,
        _baselines: Vec<BaselineUpdate>,
    ) -> StorageResult<i64> {
        Err(StorageError::QueryFailed("disk I/O error".to_string()))
    }

    async fn mark_alert_sent(&self, run_id: i64) -> StorageResult<()> {
        self.inner.mark_alert_sent(run_id).await
    }

    async fn active_baseline(&self, host: &str, path: &str) -> StorageResult<Option<BaselineRow>> {
        self.inner.active_baseline(host, path).await
    }

    async fn replace_baseline(
        &self,
        host: &str,
        path: &str,
        content_hash: &str,
        line_count: u64,
    ) -> StorageResult<()> {
        self.inner
            .replace_baseline(host, path, content_hash, line_count)
            .await
    }

    async fn touch_last_seen(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_last_seen(host, at).await
    }

    async fn touch_last_report(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_last_report(host, at).await
    }

    async fn last_site_report(&self, site: &str) -> StorageResult<Option<DateTime<Utc>>> {
        self.inner.last_site_report(site).await
    }

    async fn touch_site_report(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_site_report(site, at).await
    }

    async fn runs_for_host(&self, host: &str, limit: usize) -> StorageResult<Vec<StoredRun>> {
        self.inner.runs_for_host(host, limit).await
    }

    async fn log_entries_for_run(&self, run_id: i64) -> StorageResult<Vec<LogEntryRow>> {
        self.inner.log_entries_for_run(run_id).await
    }

    async fn changes_for_run(&self, run_id: i64) -> StorageResult<Vec<DetectedChangeRow>> {
        self.inner.changes_for_run(run_id).await
    }

    async fn baseline_history(&self, host: &str, path: &str) -> StorageResult<Vec<BaselineRow>> {
        self.inner.baseline_history(host, path).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_persistence_fault_yields_exactly_one_failed_run() {
    let storage: Arc<dyn StorageBackend> = Arc::new(FaultyStorage {
        inner: MemoryBackend::new(),
    });
    let scheduler = Arc::new(ReportScheduler::new(
        storage.clone(),
        Arc::new(PlainTextRenderer),
        None,
        vec![],
        ReportingConfig::default(),
    ));
    let pipeline = HostPipeline::new(
        storage.clone(),
        Arc::new(BasicAnalyzer),
        Arc::new(AlertRouter::new(None, None, vec![])),
        scheduler,
        3,
    );

    let config = host_config("web-1", &["/var/log/syslog"]);
    let host = HostRow::from_config(&config);
    storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new().with_file("/var/log/syslog", "ok\n");
    let result = pipeline.run(&host, Box::new(shell), COMMAND_TIMEOUT).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("disk I/O error"));

    // Exactly one run row: the failed one. The rejected success row must
    // not have landed alongside it.
    let runs = storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.status, RunStatus::Failed);
    assert!(runs[0]
        .run
        .error_message
        .as_deref()
        .unwrap()
        .contains("disk I/O error"));

    // None of the unit of work leaked: no children, no baseline.
    assert!(storage
        .log_entries_for_run(runs[0].id)
        .await
        .unwrap()
        .is_empty());
    assert!(storage
        .baseline_history("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .is_empty());
}
