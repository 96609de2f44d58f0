//! Cycle fan-out: pool bounds, isolation, and summary accounting

use std::sync::Arc;
use std::time::Duration;

use logvigil::orchestrator::MonitoringOrchestrator;
use logvigil::RunStatus;

use crate::helpers::{
    fixture, host_config, ConcurrencyGauge, Fixture, ScriptedShell, ScriptedShellFactory,
    COMMAND_TIMEOUT,
};

fn orchestrator(
    f: &Fixture,
    factory: ScriptedShellFactory,
    max_concurrent: usize,
) -> MonitoringOrchestrator {
    MonitoringOrchestrator::new(
        f.storage.clone(),
        f.pipeline.clone(),
        f.scheduler.clone(),
        Arc::new(factory),
        max_concurrent,
        COMMAND_TIMEOUT,
    )
}

#[tokio::test(start_paused = true)]
async fn test_cycle_never_exceeds_worker_pool_bound() {
    let f = fixture();
    let gauge = ConcurrencyGauge::default();

    let mut factory = ScriptedShellFactory::new();
    let mut hosts = Vec::new();
    for i in 0..8 {
        let name = format!("web-{i}");
        factory = factory.with_shell(
            &name,
            ScriptedShell::new()
                .with_file("/var/log/syslog", "ok\n")
                .with_delay(Duration::from_secs(1))
                .with_gauge(gauge.clone()),
        );
        hosts.push(host_config(&name, &["/var/log/syslog"]));
    }

    let summary = orchestrator(&f, factory, 2).run_cycle(&hosts).await;

    assert_eq!(summary.hosts_total, 8);
    assert_eq!(summary.succeeded, 8);
    assert!(gauge.peak() <= 2, "peak concurrency was {}", gauge.peak());
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_host_never_touches_the_others() {
    let f = fixture();
    let factory = ScriptedShellFactory::new()
        .with_shell("bad-host", ScriptedShell::new().failing_connect())
        .with_shell(
            "good-host",
            ScriptedShell::new().with_file("/var/log/syslog", "fine\n"),
        );
    let hosts = vec![
        host_config("bad-host", &["/var/log/syslog"]),
        host_config("good-host", &["/var/log/syslog"]),
    ];

    let summary = orchestrator(&f, factory, 5).run_cycle(&hosts).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.results.len(), 2);

    // Both hosts got a run row; the good one kept its full pipeline output.
    let bad_runs = f.storage.runs_for_host("bad-host", 10).await.unwrap();
    assert_eq!(bad_runs[0].run.status, RunStatus::Failed);

    let good_runs = f.storage.runs_for_host("good-host", 10).await.unwrap();
    assert_eq!(good_runs[0].run.status, RunStatus::Success);
    assert!(f
        .storage
        .active_baseline("good-host", "/var/log/syslog")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_disabled_hosts_are_reconciled_but_not_run() {
    let f = fixture();
    let factory = ScriptedShellFactory::new().with_shell(
        "enabled-host",
        ScriptedShell::new().with_file("/var/log/syslog", "up\n"),
    );

    let mut disabled = host_config("disabled-host", &["/var/log/syslog"]);
    disabled.enabled = false;
    let hosts = vec![host_config("enabled-host", &["/var/log/syslog"]), disabled];

    let summary = orchestrator(&f, factory, 5).run_cycle(&hosts).await;

    assert_eq!(summary.hosts_total, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(f
        .storage
        .runs_for_host("disabled-host", 10)
        .await
        .unwrap()
        .is_empty());

    // Still visible to storage so an operator can re-enable it.
    assert!(f
        .storage
        .get_host("disabled-host")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cycle_summary_timing_and_results() {
    let f = fixture();
    let factory = ScriptedShellFactory::new().with_shell(
        "web-1",
        ScriptedShell::new()
            .with_file("/var/log/syslog", "ok\n")
            .with_delay(Duration::from_secs(2)),
    );
    let hosts = vec![host_config("web-1", &["/var/log/syslog"])];

    let summary = orchestrator(&f, factory, 5).run_cycle(&hosts).await;

    assert!(summary.finished_at >= summary.started_at);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].host, "web-1");
    assert_eq!(summary.results[0].status, RunStatus::Success);
    assert!(summary.results[0].execution_secs > 0.0);
}
