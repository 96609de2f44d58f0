//! In-memory storage backend (no persistence)
//!
//! Keeps the full monitoring state in process memory behind a `RwLock`.
//! Useful for testing without database dependencies and for one-shot runs
//! where persistence across invocations is not wanted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{BaselineUpdate, HealthStatus, StorageBackend, StoredRun};
use super::error::{StorageError, StorageResult};
use super::schema::{BaselineRow, DetectedChangeRow, HostRow, LogEntryRow, MonitoringRunRow};

#[derive(Default)]
struct Inner {
    hosts: HashMap<String, HostRow>,
    runs: Vec<StoredRun>,
    log_entries: HashMap<i64, Vec<LogEntryRow>>,
    changes: HashMap<i64, Vec<DetectedChangeRow>>,
    /// Baseline history per (host, path), oldest first.
    baselines: HashMap<(String, String), Vec<BaselineRow>>,
    site_reports: HashMap<String, DateTime<Utc>>,
    next_run_id: i64,
}

/// In-memory storage backend
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_run_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn upsert_host(&self, host: HostRow) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.hosts.get_mut(&host.name) {
            Some(existing) => {
                let last_seen = existing.last_seen;
                let last_report_sent = existing.last_report_sent;
                *existing = host;
                existing.last_seen = last_seen;
                existing.last_report_sent = last_report_sent;
            }
            None => {
                inner.hosts.insert(host.name.clone(), host);
            }
        }
        Ok(())
    }

    async fn enabled_hosts(&self) -> StorageResult<Vec<HostRow>> {
        let inner = self.inner.read().await;
        let mut hosts: Vec<_> = inner.hosts.values().filter(|h| h.enabled).cloned().collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hosts)
    }

    async fn get_host(&self, name: &str) -> StorageResult<Option<HostRow>> {
        Ok(self.inner.read().await.hosts.get(name).cloned())
    }

    async fn insert_run(&self, run: MonitoringRunRow) -> StorageResult<i64> {
        let mut inner = self.inner.write().await;
        if !inner.hosts.contains_key(&run.host) {
            return Err(StorageError::UnknownHost(run.host.clone()));
        }
        let id = inner.next_run_id;
        inner.next_run_id += 1;
        inner.runs.push(StoredRun { id, run });
        Ok(id)
    }

    async fn persist_run(
        &self,
        run: MonitoringRunRow,
        entries: Vec<LogEntryRow>,
        changes: Vec<DetectedChangeRow>,
        baselines: Vec<BaselineUpdate>,
    ) -> StorageResult<i64> {
        // One critical section for the whole unit of work: either the
        // host check rejects everything up front, or it all lands.
        let mut inner = self.inner.write().await;
        if !inner.hosts.contains_key(&run.host) {
            return Err(StorageError::UnknownHost(run.host.clone()));
        }

        let host = run.host.clone();
        let id = inner.next_run_id;
        inner.next_run_id += 1;
        inner.runs.push(StoredRun { id, run });

        if !entries.is_empty() {
            inner.log_entries.insert(id, entries);
        }
        if !changes.is_empty() {
            inner.changes.insert(id, changes);
        }

        for update in baselines {
            let rows = inner
                .baselines
                .entry((host.clone(), update.path.clone()))
                .or_default();
            for row in rows.iter_mut() {
                row.is_active = false;
            }
            rows.push(BaselineRow {
                host: host.clone(),
                path: update.path,
                content_hash: update.content_hash,
                line_count: update.line_count,
                created_at: Utc::now(),
                is_active: true,
            });
        }

        Ok(id)
    }

    async fn mark_alert_sent(&self, run_id: i64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.runs.iter_mut().find(|r| r.id == run_id) {
            Some(stored) => {
                stored.run.alert_sent = true;
                Ok(())
            }
            None => Err(StorageError::QueryFailed(format!(
                "no run with id {run_id}"
            ))),
        }
    }

    async fn active_baseline(&self, host: &str, path: &str) -> StorageResult<Option<BaselineRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .baselines
            .get(&(host.to_string(), path.to_string()))
            .and_then(|rows| rows.iter().find(|b| b.is_active).cloned()))
    }

    async fn replace_baseline(
        &self,
        host: &str,
        path: &str,
        content_hash: &str,
        line_count: u64,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .baselines
            .entry((host.to_string(), path.to_string()))
            .or_default();
        for row in rows.iter_mut() {
            row.is_active = false;
        }
        rows.push(BaselineRow {
            host: host.to_string(),
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            line_count,
            created_at: Utc::now(),
            is_active: true,
        });
        debug!("replaced baseline for {host}:{path}");
        Ok(())
    }

    async fn touch_last_seen(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.hosts.get_mut(host) {
            Some(row) => {
                row.last_seen = Some(at);
                Ok(())
            }
            None => Err(StorageError::UnknownHost(host.to_string())),
        }
    }

    async fn touch_last_report(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.hosts.get_mut(host) {
            Some(row) => {
                row.last_report_sent = Some(at);
                Ok(())
            }
            None => Err(StorageError::UnknownHost(host.to_string())),
        }
    }

    async fn last_site_report(&self, site: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self.inner.read().await.site_reports.get(site).copied())
    }

    async fn touch_site_report(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner
            .write()
            .await
            .site_reports
            .insert(site.to_string(), at);
        Ok(())
    }

    async fn runs_for_host(&self, host: &str, limit: usize) -> StorageResult<Vec<StoredRun>> {
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .iter()
            .rev()
            .filter(|r| r.run.host == host)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn log_entries_for_run(&self, run_id: i64) -> StorageResult<Vec<LogEntryRow>> {
        let inner = self.inner.read().await;
        Ok(inner.log_entries.get(&run_id).cloned().unwrap_or_default())
    }

    async fn changes_for_run(&self, run_id: i64) -> StorageResult<Vec<DetectedChangeRow>> {
        let inner = self.inner.read().await;
        Ok(inner.changes.get(&run_id).cloned().unwrap_or_default())
    }

    async fn baseline_history(&self, host: &str, path: &str) -> StorageResult<Vec<BaselineRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .baselines
            .get(&(host.to_string(), path.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("hosts".to_string(), inner.hosts.len().to_string()),
                ("runs".to_string(), inner.runs.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
