//! End-to-end pipeline runs against scripted shells and memory storage

use crate::helpers::{fixture, host_config, ScriptedShell, COMMAND_TIMEOUT};
use logvigil::storage::{ChangeType, HostRow};
use logvigil::RunStatus;

#[tokio::test]
async fn test_successful_run_persists_all_rows() {
    let f = fixture();
    let config = host_config("web-1", &["/var/log/syslog", "/var/log/secure"]);
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new().with_file("/var/log/syslog", "boot ok\nservice up\n");
    let result = f
        .pipeline
        .run(&host, Box::new(shell), COMMAND_TIMEOUT)
        .await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.changes_detected, 1);

    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.status, RunStatus::Success);
    assert_eq!(runs[0].run.changes_detected, 1);
    assert_eq!(runs[0].run.health_score, Some(95));

    // Only the readable file produced a stored entry.
    let entries = f.storage.log_entries_for_run(runs[0].id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "/var/log/syslog");
    assert_eq!(entries[0].line_count, 2);

    let changes = f.storage.changes_for_run(runs[0].id).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::NewLog);

    let baseline = f
        .storage
        .active_baseline("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .unwrap();
    assert!(baseline.is_active);

    let stored = f.storage.get_host("web-1").await.unwrap().unwrap();
    assert!(stored.last_seen.is_some());
}

#[tokio::test]
async fn test_new_then_unchanged_then_modified() {
    let f = fixture();
    let config = host_config("web-1", &["/var/log/syslog"]);
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    let first = ScriptedShell::new().with_file("/var/log/syslog", "line one\n");
    let result = f.pipeline.run(&host, Box::new(first), COMMAND_TIMEOUT).await;
    assert_eq!(result.changes_detected, 1);

    // Same content: the baseline matches, nothing to report.
    let unchanged = ScriptedShell::new().with_file("/var/log/syslog", "line one\n");
    let result = f
        .pipeline
        .run(&host, Box::new(unchanged), COMMAND_TIMEOUT)
        .await;
    assert_eq!(result.changes_detected, 0);

    let modified = ScriptedShell::new().with_file("/var/log/syslog", "line one\nline two\n");
    let result = f
        .pipeline
        .run(&host, Box::new(modified), COMMAND_TIMEOUT)
        .await;
    assert_eq!(result.changes_detected, 1);

    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs.len(), 3);
    let changes = f.storage.changes_for_run(runs[0].id).await.unwrap();
    assert_eq!(changes[0].change_type, ChangeType::LogModified);

    // Replacement deactivated the old baseline rather than deleting it.
    let history = f
        .storage
        .baseline_history("web-1", "/var/log/syslog")
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|b| b.is_active).count(), 1);
}

#[tokio::test]
async fn test_glob_patterns_expand_into_concrete_retrievals() {
    let f = fixture();
    let config = host_config("web-1", &["/var/log/app/*.log"]);
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new()
        .with_glob(
            "/var/log/app/*.log",
            &["/var/log/app/access.log", "/var/log/app/error.log"],
        )
        .with_file("/var/log/app/access.log", "GET /\n")
        .with_file("/var/log/app/error.log", "oom\n");

    let result = f
        .pipeline
        .run(&host, Box::new(shell), COMMAND_TIMEOUT)
        .await;
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.changes_detected, 2);

    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    let entries = f.storage.log_entries_for_run(runs[0].id).await.unwrap();
    assert_eq!(entries.len(), 2);

    assert!(f
        .storage
        .active_baseline("web-1", "/var/log/app/error.log")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_persists_failed_run() {
    let f = fixture();
    let config = host_config("web-1", &["/var/log/syslog"]);
    let host = HostRow::from_config(&config);
    f.storage.upsert_host(host.clone()).await.unwrap();

    let shell = ScriptedShell::new().failing_connect();
    let result = f
        .pipeline
        .run(&host, Box::new(shell), COMMAND_TIMEOUT)
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.is_some());
    assert_eq!(result.changes_detected, 0);

    let runs = f.storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.status, RunStatus::Failed);
    assert!(runs[0].run.error_message.is_some());
    assert!(runs[0].run.health_score.is_none());

    // Nothing downstream of the failure was written.
    assert!(f
        .storage
        .active_baseline("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .is_none());
}
