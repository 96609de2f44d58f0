use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use logvigil::{
    alerts::{AlertRouter, DetailedNotifier, PushGateway, PushNotifier, WebhookNotifier},
    analysis::BasicAnalyzer,
    config::{read_config_file, StorageConfig},
    orchestrator::{MonitoringOrchestrator, SshShellFactory},
    pipeline::HostPipeline,
    reports::{PlainTextRenderer, ReportScheduler},
    storage::{memory::MemoryBackend, StorageBackend},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("logvigil", LevelFilter::TRACE),
        ("monitor", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_storage(config: Option<StorageConfig>) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory storage, nothing persists across invocations");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("using sqlite storage at {}", path.display());
            let backend = logvigil::storage::sqlite::SqliteBackend::new(&path).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => anyhow::bail!(
            "sqlite storage configured but this build lacks the storage-sqlite feature"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let storage = open_storage(config.storage.clone()).await?;

    let (detailed, push, recipients): (
        Option<Arc<dyn DetailedNotifier>>,
        Option<Arc<dyn PushNotifier>>,
        Vec<String>,
    ) = match &config.alerting {
        Some(alerting) => (
            Some(Arc::new(WebhookNotifier::new(&alerting.webhook_url))),
            alerting
                .push_url
                .as_deref()
                .map(|url| Arc::new(PushGateway::new(url)) as Arc<dyn PushNotifier>),
            alerting.recipients.clone(),
        ),
        None => {
            info!("no alerting configured, findings are stored only");
            (None, None, vec![])
        }
    };

    let alert_router = Arc::new(AlertRouter::new(detailed.clone(), push, recipients.clone()));
    let report_scheduler = Arc::new(ReportScheduler::new(
        storage.clone(),
        Arc::new(PlainTextRenderer),
        detailed,
        recipients,
        config.reporting.clone(),
    ));

    let command_timeout = Duration::from_secs(config.monitoring.command_timeout_secs);
    let pipeline = Arc::new(HostPipeline::new(
        storage.clone(),
        Arc::new(BasicAnalyzer),
        alert_router,
        report_scheduler.clone(),
        config.monitoring.connect_retries,
    ));

    let orchestrator = MonitoringOrchestrator::new(
        storage.clone(),
        pipeline,
        report_scheduler,
        Arc::new(SshShellFactory::new(command_timeout)),
        config.monitoring.max_concurrent_hosts,
        command_timeout,
    );

    let summary = orchestrator.run_cycle(&config.hosts).await;
    info!(
        "monitored {} host(s): {} succeeded, {} failed, {} skipped",
        summary.hosts_total, summary.succeeded, summary.failed, summary.skipped
    );
    for result in &summary.results {
        if let Some(error) = &result.error {
            error!("{}: {error}", result.host);
        }
    }

    if let Err(e) = storage.close().await {
        error!("storage shutdown failed: {e}");
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
