//! Single-host monitoring pipeline
//!
//! One host, one run: connect -> collect -> diff -> analyze -> persist ->
//! decide. The SSH session is scoped to the run and released on every exit
//! path. Any connection, retrieval, or persistence fault aborts this
//! host's run only: a failed `MonitoringRun` row is written with the
//! elapsed time up to the point of failure, and the pipeline returns a
//! failure result without throwing - that is what makes per-host isolation
//! possible at the orchestrator level.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::AlertRouter;
use crate::analysis::Analyzer;
use crate::collector::{RemoteCollector, RemoteShell};
use crate::detector::{baseline_updates, ChangeDetector};
use crate::reports::ReportScheduler;
use crate::storage::{HostRow, LogEntryRow, MonitoringRunRow, StorageBackend};
use crate::{Analysis, RunStatus, Severity};

/// What one host's pipeline run produced, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct HostRunResult {
    pub host: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub changes_detected: usize,
    pub alert_sent: bool,
    pub report_sent: bool,
    pub execution_secs: f64,
}

pub struct HostPipeline {
    storage: Arc<dyn StorageBackend>,
    detector: ChangeDetector,
    analyzer: Arc<dyn Analyzer>,
    alert_router: Arc<AlertRouter>,
    report_scheduler: Arc<ReportScheduler>,
    connect_retries: u32,
}

impl HostPipeline {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        analyzer: Arc<dyn Analyzer>,
        alert_router: Arc<AlertRouter>,
        report_scheduler: Arc<ReportScheduler>,
        connect_retries: u32,
    ) -> Self {
        Self {
            detector: ChangeDetector::new(storage.clone()),
            storage,
            analyzer,
            alert_router,
            report_scheduler,
            connect_retries,
        }
    }

    /// Run the full pipeline for one host. Never throws: every outcome,
    /// including failure, comes back as a [`HostRunResult`] and lands in
    /// storage as a run row.
    #[instrument(skip(self, host, shell), fields(host = %host.name))]
    pub async fn run(
        &self,
        host: &HostRow,
        shell: Box<dyn RemoteShell>,
        command_timeout: Duration,
    ) -> HostRunResult {
        let run_date = Utc::now();
        let timer = Instant::now();
        let mut collector = RemoteCollector::new(&host.name, shell, command_timeout);

        let outcome = self.execute(host, &mut collector, timer).await;

        // The session is released on every exit path, including failure.
        collector.disconnect().await;

        match outcome {
            Ok(result) => result,
            Err(message) => {
                let execution_secs = timer.elapsed().as_secs_f64();
                error!("{}: run failed after {execution_secs:.1}s: {message}", host.name);

                let failed_run =
                    MonitoringRunRow::failed(&host.name, run_date, execution_secs, message.clone());
                if let Err(persist_err) = self.storage.insert_run(failed_run).await {
                    error!(
                        "{}: could not persist failed run: {persist_err}",
                        host.name
                    );
                }

                HostRunResult {
                    host: host.name.clone(),
                    status: RunStatus::Failed,
                    error: Some(message),
                    changes_detected: 0,
                    alert_sent: false,
                    report_sent: false,
                    execution_secs,
                }
            }
        }
    }

    async fn execute(
        &self,
        host: &HostRow,
        collector: &mut RemoteCollector,
        timer: Instant,
    ) -> Result<HostRunResult, String> {
        let run_date = Utc::now();

        // Connecting
        collector
            .connect(self.connect_retries)
            .await
            .map_err(|e| e.to_string())?;

        // Collecting
        let retrievals = collector
            .retrieve_multiple_paths(&host.logs)
            .await
            .map_err(|e| e.to_string())?;
        debug!("{}: {} retrieval(s)", host.name, retrievals.len());

        // The prior fingerprint frames the analysis as "compared to X"
        // versus "no baseline yet"; read before baselines are rewritten.
        let prior_baseline_hash = match host.logs.first() {
            Some(path) => self
                .storage
                .active_baseline(&host.name, path)
                .await
                .map_err(|e| e.to_string())?
                .map(|baseline| baseline.content_hash),
            None => None,
        };

        // Diffing - against the baseline state as of the start of the run.
        let changes = self
            .detector
            .detect_changes(&host.name, &retrievals)
            .await
            .map_err(|e| e.to_string())?;

        // Analyzing - collaborator failure degrades, never aborts.
        let analysis = match self
            .analyzer
            .analyze(host, &retrievals, prior_baseline_hash.as_deref())
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("{}: {e}; substituting fallback analysis", host.name);
                Analysis::fallback()
            }
        };

        // Persisting - the run, its children, and the baseline rewrites
        // land as one unit of work. A fault here leaves no partial run
        // behind; the caller's failed-run row becomes the only record.
        let run = MonitoringRunRow::success(
            &host.name,
            run_date,
            timer.elapsed().as_secs_f64(),
            &analysis,
            changes.len() as u32,
        );
        let entries: Vec<LogEntryRow> = retrievals
            .iter()
            .filter_map(LogEntryRow::from_retrieval)
            .collect();
        let run_id = self
            .storage
            .persist_run(run, entries, changes.clone(), baseline_updates(&retrievals))
            .await
            .map_err(|e| e.to_string())?;

        // The run is committed; nothing past this point may escalate into
        // a second run row for the same execution.
        if let Err(e) = self.storage.touch_last_seen(&host.name, Utc::now()).await {
            error!("{}: could not update last_seen: {e}", host.name);
        }

        // Deciding - alerting and reporting are independent decisions.
        let mut alert_sent = false;
        if analysis.severity >= Severity::Warn {
            let routing = self
                .alert_router
                .route(&host.name, &analysis, &changes)
                .await;
            if routing.detailed_sent {
                alert_sent = true;
                if let Err(e) = self.storage.mark_alert_sent(run_id).await {
                    error!("{}: could not flag alert as sent: {e}", host.name);
                }
            }
        }

        let report_sent = match self
            .report_scheduler
            .maybe_send_host_report(host, Some(&analysis))
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                error!("{}: report scheduling failed: {e}", host.name);
                false
            }
        };

        let execution_secs = timer.elapsed().as_secs_f64();
        info!(
            "{}: run complete in {execution_secs:.1}s ({} change(s), severity {})",
            host.name,
            changes.len(),
            analysis.severity
        );

        Ok(HostRunResult {
            host: host.name.clone(),
            status: RunStatus::Success,
            error: None,
            changes_detected: changes.len(),
            alert_sent,
            report_sent,
            execution_secs,
        })
    }
}
