//! Cycle orchestration
//!
//! Fans one monitoring cycle out across all enabled hosts on a bounded
//! worker pool, isolates per-host failures, and aggregates a cycle
//! summary once every submitted host task has completed. Hosts are the
//! unit of parallelism; within a host the pipeline steps are strictly
//! sequential.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::collector::{RemoteShell, SshSession};
use crate::config::HostConfig;
use crate::pipeline::{HostPipeline, HostRunResult};
use crate::reports::ReportScheduler;
use crate::storage::{HostRow, StorageBackend};
use crate::RunStatus;

/// Creates the remote shell session a host's pipeline run will use.
/// A seam so cycles can run against scripted shells in tests.
pub trait ShellFactory: Send + Sync {
    fn open(&self, host: &HostConfig) -> Box<dyn RemoteShell>;
}

/// Production factory: SSH sessions from the host's configuration.
pub struct SshShellFactory {
    connect_timeout: Duration,
}

impl SshShellFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ShellFactory for SshShellFactory {
    fn open(&self, host: &HostConfig) -> Box<dyn RemoteShell> {
        Box::new(SshSession::new(
            &host.hostname,
            host.port,
            &host.user,
            host.key_path.clone(),
            self.connect_timeout,
        ))
    }
}

/// Aggregate outcome of one full pass across the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Hosts skipped because a previous cycle was still running them.
    pub skipped: usize,
    /// Per-host results in completion order, not submission order.
    pub results: Vec<HostRunResult>,
}

pub struct MonitoringOrchestrator {
    storage: Arc<dyn StorageBackend>,
    pipeline: Arc<HostPipeline>,
    report_scheduler: Arc<ReportScheduler>,
    shells: Arc<dyn ShellFactory>,
    max_concurrent_hosts: usize,
    command_timeout: Duration,
    /// Hosts with a pipeline run in flight. Guards against overlapping
    /// cycles racing the same host's baselines.
    active_hosts: Arc<Mutex<HashSet<String>>>,
}

impl MonitoringOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        pipeline: Arc<HostPipeline>,
        report_scheduler: Arc<ReportScheduler>,
        shells: Arc<dyn ShellFactory>,
        max_concurrent_hosts: usize,
        command_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            pipeline,
            report_scheduler,
            shells,
            max_concurrent_hosts: max_concurrent_hosts.max(1),
            command_timeout,
            active_hosts: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one monitoring cycle: reconcile hosts into storage, fan out
    /// pipelines over the worker pool, wait for every task (the barrier),
    /// then run the site-level report pass.
    #[instrument(skip(self, hosts), fields(hosts = hosts.len()))]
    pub async fn run_cycle(&self, hosts: &[HostConfig]) -> CycleSummary {
        let started_at = Utc::now();
        info!("starting monitoring cycle across {} host(s)", hosts.len());

        // Reconcile the configuration source into storage first, so the
        // cycle runs against rows carrying the stored timestamps.
        for host in hosts {
            if let Err(e) = self.storage.upsert_host(HostRow::from_config(host)).await {
                error!("could not reconcile host {}: {e}", host.name);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_hosts));
        let mut join_set: JoinSet<HostRunResult> = JoinSet::new();
        let mut submitted = 0usize;
        let mut skipped = 0usize;

        for host in hosts.iter().filter(|h| h.enabled) {
            let row = match self.storage.get_host(&host.name).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    error!("{}: missing from storage after reconciliation", host.name);
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("{}: could not load host row: {e}", host.name);
                    skipped += 1;
                    continue;
                }
            };

            {
                let mut active = self.active_hosts.lock().await;
                if !active.insert(host.name.clone()) {
                    warn!(
                        "{}: previous cycle still running this host, skipping",
                        host.name
                    );
                    skipped += 1;
                    continue;
                }
            }

            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let active_hosts = self.active_hosts.clone();
            let shell = self.shells.open(host);
            let command_timeout = self.command_timeout;
            let host_name = host.name.clone();

            submitted += 1;
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => pipeline.run(&row, shell, command_timeout).await,
                    Err(_) => HostRunResult {
                        host: host_name.clone(),
                        status: RunStatus::Failed,
                        error: Some("worker pool closed before run".to_string()),
                        changes_detected: 0,
                        alert_sent: false,
                        report_sent: false,
                        execution_secs: 0.0,
                    },
                };
                active_hosts.lock().await.remove(&host_name);
                result
            });
        }

        debug!("{submitted} host task(s) submitted, collecting as they complete");

        // Barrier: the summary exists only after all tasks have joined.
        let mut results = Vec::with_capacity(submitted);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("host task panicked: {e}"),
            }
        }

        self.run_site_reports().await;

        let succeeded = results
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count();
        let failed = results.len() - succeeded;

        let summary = CycleSummary {
            started_at,
            finished_at: Utc::now(),
            hosts_total: hosts.iter().filter(|h| h.enabled).count(),
            succeeded,
            failed,
            skipped,
            results,
        };

        info!(
            "cycle complete: {} succeeded, {} failed, {} skipped",
            summary.succeeded, summary.failed, summary.skipped
        );
        summary
    }

    /// Site-level aggregate reports, one per site, after the barrier so
    /// each report sees the cycle's fresh runs.
    async fn run_site_reports(&self) {
        let hosts = match self.storage.enabled_hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                error!("could not load hosts for site reports: {e}");
                return;
            }
        };

        let mut sites: HashMap<String, Vec<HostRow>> = HashMap::new();
        for host in hosts {
            if let Some(site) = host.site.clone() {
                sites.entry(site).or_default().push(host);
            }
        }

        for (site, site_hosts) in sites {
            match self
                .report_scheduler
                .maybe_send_site_report(&site, &site_hosts)
                .await
            {
                Ok(true) => debug!("site report sent for {site}"),
                Ok(false) => {}
                Err(e) => error!("site report for {site} failed: {e}"),
            }
        }
    }
}
