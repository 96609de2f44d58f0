//! Periodic report scheduling
//!
//! Decides, independent of alerting, whether a summary report is due for
//! a host or a site. The effective frequency resolves through a
//! host -> site -> global override hierarchy; an unrecognized value logs a
//! warning and falls back to daily. A failed send leaves the last-sent
//! timestamp untouched so the next cycle retries.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::alerts::DetailedNotifier;
use crate::config::ReportingConfig;
use crate::storage::{HostRow, StorageBackend, StorageResult, StoredRun};
use crate::Analysis;

/// Recognized reporting cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl ReportFrequency {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hourly" => Some(ReportFrequency::Hourly),
            "daily" => Some(ReportFrequency::Daily),
            "weekly" => Some(ReportFrequency::Weekly),
            "monthly" => Some(ReportFrequency::Monthly),
            _ => None,
        }
    }

    /// Minimum interval between two reports at this cadence.
    pub fn threshold(&self) -> Duration {
        match self {
            ReportFrequency::Hourly => Duration::hours(1),
            ReportFrequency::Daily => Duration::hours(24),
            ReportFrequency::Weekly => Duration::days(7),
            ReportFrequency::Monthly => Duration::days(30),
        }
    }
}

/// Resolve the effective frequency for a host: host-level override first,
/// then the host's site, then the global default. The first value present
/// wins; if it fails to parse, warn and fall back to daily.
pub fn resolve_frequency(host: &HostRow, reporting: &ReportingConfig) -> ReportFrequency {
    let configured = host
        .report_frequency
        .as_deref()
        .or_else(|| {
            host.site
                .as_deref()
                .and_then(|site| reporting.site_frequencies.get(site))
                .map(String::as_str)
        })
        .unwrap_or(&reporting.default_frequency);

    ReportFrequency::parse(configured).unwrap_or_else(|| {
        warn!(
            "unrecognized report frequency {configured:?} for host {}, falling back to daily",
            host.name
        );
        ReportFrequency::Daily
    })
}

/// A report is due immediately when none was ever sent; otherwise once the
/// frequency threshold has elapsed since the last one.
pub fn is_due(
    last_sent: Option<DateTime<Utc>>,
    frequency: ReportFrequency,
    now: DateTime<Utc>,
) -> bool {
    match last_sent {
        None => true,
        Some(last) => now - last >= frequency.threshold(),
    }
}

/// Renders monitoring data into report text. Pure: no side effects.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, subject: &str, runs: &[StoredRun], analysis: Option<&Analysis>) -> String;
}

/// Plain-text renderer used when no external renderer is wired up.
pub struct PlainTextRenderer;

impl ReportRenderer for PlainTextRenderer {
    fn render(&self, subject: &str, runs: &[StoredRun], analysis: Option<&Analysis>) -> String {
        let mut lines = vec![format!("Monitoring report for {subject}")];

        if let Some(analysis) = analysis {
            lines.push(format!(
                "Latest health: {}/100 ({})",
                analysis.health_score, analysis.severity
            ));
            lines.push(analysis.summary.clone());
        }

        lines.push(format!("Recent runs: {}", runs.len()));
        for stored in runs {
            lines.push(format!(
                "  {} {} ({:.1}s, {} change(s)){}",
                stored.run.run_date.format("%Y-%m-%d %H:%M:%S"),
                stored.run.status,
                stored.run.execution_secs,
                stored.run.changes_detected,
                stored
                    .run
                    .error_message
                    .as_deref()
                    .map(|e| format!(" - {e}"))
                    .unwrap_or_default(),
            ));
        }

        lines.join("\n")
    }
}

/// Runs included in one report.
const REPORT_RUN_WINDOW: usize = 20;

pub struct ReportScheduler {
    storage: Arc<dyn StorageBackend>,
    renderer: Arc<dyn ReportRenderer>,
    sender: Option<Arc<dyn DetailedNotifier>>,
    recipients: Vec<String>,
    reporting: ReportingConfig,
}

impl ReportScheduler {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        renderer: Arc<dyn ReportRenderer>,
        sender: Option<Arc<dyn DetailedNotifier>>,
        recipients: Vec<String>,
        reporting: ReportingConfig,
    ) -> Self {
        Self {
            storage,
            renderer,
            sender,
            recipients,
            reporting,
        }
    }

    /// Send the host's periodic report if one is due. Returns whether a
    /// report went out; a failed send changes nothing so the next cycle
    /// retries.
    #[instrument(skip(self, host, analysis), fields(host = %host.name))]
    pub async fn maybe_send_host_report(
        &self,
        host: &HostRow,
        analysis: Option<&Analysis>,
    ) -> StorageResult<bool> {
        let frequency = resolve_frequency(host, &self.reporting);

        // The stored row carries the authoritative last-sent timestamp.
        let last_sent = self
            .storage
            .get_host(&host.name)
            .await?
            .and_then(|row| row.last_report_sent);

        if !is_due(last_sent, frequency, Utc::now()) {
            debug!("report not due (frequency {frequency:?})");
            return Ok(false);
        }

        let Some(sender) = &self.sender else {
            debug!("report due but no sender configured");
            return Ok(false);
        };

        let runs = self
            .storage
            .runs_for_host(&host.name, REPORT_RUN_WINDOW)
            .await?;
        let text = self.renderer.render(&host.name, &runs, analysis);
        let subject = format!("Monitoring report: {}", host.name);

        match sender
            .send(&self.recipients, &subject, &json!({ "report": text }))
            .await
        {
            Ok(()) => {
                self.storage
                    .touch_last_report(&host.name, Utc::now())
                    .await?;
                Ok(true)
            }
            Err(e) => {
                error!("report for {} failed to send: {e}", host.name);
                Ok(false)
            }
        }
    }

    /// Site-level aggregate: one report per site, same due-check pattern
    /// keyed by site instead of host.
    #[instrument(skip(self, hosts))]
    pub async fn maybe_send_site_report(
        &self,
        site: &str,
        hosts: &[HostRow],
    ) -> StorageResult<bool> {
        let frequency = self
            .reporting
            .site_frequencies
            .get(site)
            .map(String::as_str)
            .unwrap_or(&self.reporting.default_frequency);
        let frequency = ReportFrequency::parse(frequency).unwrap_or_else(|| {
            warn!("unrecognized report frequency {frequency:?} for site {site}, falling back to daily");
            ReportFrequency::Daily
        });

        let last_sent = self.storage.last_site_report(site).await?;
        if !is_due(last_sent, frequency, Utc::now()) {
            return Ok(false);
        }

        let Some(sender) = &self.sender else {
            return Ok(false);
        };

        let mut runs = Vec::new();
        for host in hosts {
            runs.extend(
                self.storage
                    .runs_for_host(&host.name, REPORT_RUN_WINDOW)
                    .await?,
            );
        }
        runs.sort_by_key(|stored| std::cmp::Reverse(stored.run.run_date));
        runs.truncate(REPORT_RUN_WINDOW);

        let text = self.renderer.render(site, &runs, None);
        let subject = format!("Site monitoring report: {site}");

        match sender
            .send(&self.recipients, &subject, &json!({ "report": text }))
            .await
        {
            Ok(()) => {
                self.storage.touch_site_report(site, Utc::now()).await?;
                Ok(true)
            }
            Err(e) => {
                error!("site report for {site} failed to send: {e}");
                Ok(false)
            }
        }
    }
}
