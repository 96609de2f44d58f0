//! SQLite backend behavior, including persistence across reopen

use chrono::Utc;
use tempfile::TempDir;

use logvigil::storage::sqlite::SqliteBackend;
use logvigil::storage::{
    BaselineUpdate, ChangeType, DetectedChangeRow, HostRow, LogEntryRow, MonitoringRunRow,
    StorageBackend,
};
use logvigil::{Analysis, RunStatus, Severity};

fn host(name: &str) -> HostRow {
    HostRow {
        name: name.to_string(),
        hostname: "10.0.0.1".to_string(),
        port: 22,
        user: "monitor".to_string(),
        enabled: true,
        site: Some("berlin".to_string()),
        tags: vec!["web".to_string()],
        logs: vec!["/var/log/syslog".to_string()],
        report_frequency: None,
        last_seen: None,
        last_report_sent: None,
    }
}

fn analysis() -> Analysis {
    Analysis {
        health_score: 90,
        severity: Severity::Info,
        summary: "all quiet".to_string(),
        recommendations: "none".to_string(),
    }
}

async fn open(dir: &TempDir) -> SqliteBackend {
    SqliteBackend::new(dir.path().join("monitoring.db"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_host_roundtrip_preserves_timestamps_on_upsert() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir).await;

    storage.upsert_host(host("web-1")).await.unwrap();
    let seen = Utc::now();
    storage.touch_last_seen("web-1", seen).await.unwrap();
    storage.touch_last_report("web-1", seen).await.unwrap();

    // Reconciliation with fresh config rows must not wipe the timestamps.
    storage.upsert_host(host("web-1")).await.unwrap();

    let stored = storage.get_host("web-1").await.unwrap().unwrap();
    assert_eq!(stored.site.as_deref(), Some("berlin"));
    assert_eq!(stored.tags, vec!["web".to_string()]);
    assert!(stored.last_seen.is_some());
    assert!(stored.last_report_sent.is_some());

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_run_with_children_roundtrip() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir).await;
    storage.upsert_host(host("web-1")).await.unwrap();

    let run = MonitoringRunRow::success("web-1", Utc::now(), 2.5, &analysis(), 1);
    let run_id = storage
        .persist_run(
            run,
            vec![LogEntryRow {
                path: "/var/log/syslog".to_string(),
                content: "boot ok\n".to_string(),
                content_hash: "aa".repeat(32),
                line_count: 1,
                file_size: 8,
                retrieved_at: Utc::now(),
            }],
            vec![DetectedChangeRow {
                change_type: ChangeType::NewLog,
                severity: Severity::Info,
                description: "New log file discovered: /var/log/syslog".to_string(),
                log_path: Some("/var/log/syslog".to_string()),
            }],
            vec![BaselineUpdate {
                path: "/var/log/syslog".to_string(),
                content_hash: "aa".repeat(32),
                line_count: 1,
            }],
        )
        .await
        .unwrap();

    let runs = storage.runs_for_host("web-1", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run_id);
    assert_eq!(runs[0].run.status, RunStatus::Success);
    assert_eq!(runs[0].run.health_score, Some(90));
    assert!(!runs[0].run.alert_sent);

    let entries = storage.log_entries_for_run(run_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].line_count, 1);

    let changes = storage.changes_for_run(run_id).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::NewLog);

    // The baseline landed in the same unit of work as the run.
    let baseline = storage
        .active_baseline("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(baseline.content_hash, "aa".repeat(32));

    storage.mark_alert_sent(run_id).await.unwrap();
    let runs = storage.runs_for_host("web-1", 10).await.unwrap();
    assert!(runs[0].run.alert_sent);

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_baseline_replacement_keeps_one_active() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir).await;
    storage.upsert_host(host("web-1")).await.unwrap();

    for (hash, lines) in [("a1", 10), ("b2", 12), ("c3", 15)] {
        storage
            .replace_baseline("web-1", "/var/log/syslog", &hash.repeat(32), lines)
            .await
            .unwrap();
    }

    let active = storage
        .active_baseline("web-1", "/var/log/syslog")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.content_hash, "c3".repeat(32));
    assert_eq!(active.line_count, 15);

    let history = storage
        .baseline_history("web-1", "/var/log/syslog")
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|b| b.is_active).count(), 1);

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let storage = open(&dir).await;
        storage.upsert_host(host("web-1")).await.unwrap();
        let run = MonitoringRunRow::success("web-1", Utc::now(), 1.0, &analysis(), 0);
        storage.insert_run(run).await.unwrap();
        storage
            .touch_site_report("berlin", Utc::now())
            .await
            .unwrap();
        storage.close().await.unwrap();
    }

    let storage = open(&dir).await;
    assert!(storage.get_host("web-1").await.unwrap().is_some());
    assert_eq!(storage.runs_for_host("web-1", 10).await.unwrap().len(), 1);
    assert!(storage.last_site_report("berlin").await.unwrap().is_some());
    assert!(storage.last_site_report("tokyo").await.unwrap().is_none());

    let health = storage.health_check().await.unwrap();
    assert!(health.healthy);

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_enabled_hosts_filters_disabled() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir).await;

    storage.upsert_host(host("web-1")).await.unwrap();
    let mut off = host("web-2");
    off.enabled = false;
    storage.upsert_host(off).await.unwrap();

    let enabled = storage.enabled_hosts().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].name, "web-1");

    storage.close().await.unwrap();
}
