//! SQLite storage backend implementation
//!
//! Embedded database holding the full monitoring history. WAL mode keeps
//! reads cheap while the per-host worker tasks write their runs; a run
//! and its children commit in the single `persist_run` transaction. The
//! single-active-baseline invariant is enforced twice, by the
//! deactivate-then-insert sequence inside `persist_run`/`replace_baseline`
//! and by a partial unique index on `baselines (host, path) WHERE
//! is_active = 1`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::{RunStatus, Severity};

use super::backend::{BaselineUpdate, HealthStatus, StorageBackend, StoredRun};
use super::error::{StorageError, StorageResult};
use super::schema::{BaselineRow, ChangeType, DetectedChangeRow, HostRow, LogEntryRow, MonitoringRunRow};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend: creates the database file if missing,
    /// runs migrations, and configures WAL mode.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn host_from_row(row: &SqliteRow) -> StorageResult<HostRow> {
        let tags_json: String = row.get("tags");
        let logs_json: String = row.get("logs");
        let tags = serde_json::from_str(&tags_json)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let logs = serde_json::from_str(&logs_json)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        Ok(HostRow {
            name: row.get("name"),
            hostname: row.get("hostname"),
            port: row.get::<i64, _>("port") as u16,
            user: row.get("user"),
            enabled: row.get::<i64, _>("enabled") != 0,
            site: row.get("site"),
            tags,
            logs,
            report_frequency: row.get("report_frequency"),
            last_seen: row.get::<Option<i64>, _>("last_seen").map(Self::from_millis),
            last_report_sent: row
                .get::<Option<i64>, _>("last_report_sent")
                .map(Self::from_millis),
        })
    }

    fn run_from_row(row: &SqliteRow) -> StorageResult<StoredRun> {
        let status: String = row.get("status");
        let alert_level: String = row.get("alert_level");

        Ok(StoredRun {
            id: row.get("id"),
            run: MonitoringRunRow {
                host: row.get("host"),
                run_date: Self::from_millis(row.get("run_date")),
                status: RunStatus::from_str(&status).map_err(StorageError::SerializationError)?,
                execution_secs: row.get("execution_secs"),
                error_message: row.get("error_message"),
                health_score: row.get::<Option<i64>, _>("health_score").map(|v| v as u8),
                anomalies_detected: row.get::<i64, _>("anomalies_detected") as u32,
                changes_detected: row.get::<i64, _>("changes_detected") as u32,
                alert_level: Severity::from_str(&alert_level)
                    .map_err(StorageError::SerializationError)?,
                alert_sent: row.get::<i64, _>("alert_sent") != 0,
            },
        })
    }

    fn baseline_from_row(row: &SqliteRow) -> BaselineRow {
        BaselineRow {
            host: row.get("host"),
            path: row.get("path"),
            content_hash: row.get("content_hash"),
            line_count: row.get::<i64, _>("line_count") as u64,
            created_at: Self::from_millis(row.get("created_at")),
            is_active: row.get::<i64, _>("is_active") != 0,
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, host), fields(host = %host.name))]
    async fn upsert_host(&self, host: HostRow) -> StorageResult<()> {
        let tags = serde_json::to_string(&host.tags)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let logs = serde_json::to_string(&host.logs)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        // Reconciliation keeps last_seen/last_report_sent from the
        // existing row; only configuration-derived fields are replaced.
        sqlx::query(
            r#"
            INSERT INTO hosts (name, hostname, port, user, enabled, site, tags, logs, report_frequency)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                hostname = excluded.hostname,
                port = excluded.port,
                user = excluded.user,
                enabled = excluded.enabled,
                site = excluded.site,
                tags = excluded.tags,
                logs = excluded.logs,
                report_frequency = excluded.report_frequency
            "#,
        )
        .bind(&host.name)
        .bind(&host.hostname)
        .bind(host.port as i64)
        .bind(&host.user)
        .bind(host.enabled as i64)
        .bind(&host.site)
        .bind(tags)
        .bind(logs)
        .bind(&host.report_frequency)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn enabled_hosts(&self) -> StorageResult<Vec<HostRow>> {
        let rows = sqlx::query("SELECT * FROM hosts WHERE enabled = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::host_from_row).collect()
    }

    async fn get_host(&self, name: &str) -> StorageResult<Option<HostRow>> {
        let row = sqlx::query("SELECT * FROM hosts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::host_from_row).transpose()
    }

    #[instrument(skip(self, run), fields(host = %run.host, status = %run.status))]
    async fn insert_run(&self, run: MonitoringRunRow) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO monitoring_runs (
                host, run_date, status, execution_secs, error_message,
                health_score, anomalies_detected, changes_detected,
                alert_level, alert_sent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.host)
        .bind(Self::to_millis(&run.run_date))
        .bind(run.status.to_string())
        .bind(run.execution_secs)
        .bind(&run.error_message)
        .bind(run.health_score.map(|v| v as i64))
        .bind(run.anomalies_detected as i64)
        .bind(run.changes_detected as i64)
        .bind(run.alert_level.to_string())
        .bind(run.alert_sent as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(
        skip_all,
        fields(host = %run.host, entries = entries.len(), changes = changes.len())
    )]
    async fn persist_run(
        &self,
        run: MonitoringRunRow,
        entries: Vec<LogEntryRow>,
        changes: Vec<DetectedChangeRow>,
        baselines: Vec<BaselineUpdate>,
    ) -> StorageResult<i64> {
        // One transaction for the whole unit of work: the run, its
        // children, and the baseline replacements commit together.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO monitoring_runs (
                host, run_date, status, execution_secs, error_message,
                health_score, anomalies_detected, changes_detected,
                alert_level, alert_sent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.host)
        .bind(Self::to_millis(&run.run_date))
        .bind(run.status.to_string())
        .bind(run.execution_secs)
        .bind(&run.error_message)
        .bind(run.health_score.map(|v| v as i64))
        .bind(run.anomalies_detected as i64)
        .bind(run.changes_detected as i64)
        .bind(run.alert_level.to_string())
        .bind(run.alert_sent as i64)
        .execute(&mut *tx)
        .await?;
        let run_id = result.last_insert_rowid();

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO log_entries (
                    run_id, path, content, content_hash, line_count, file_size, retrieved_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&entry.path)
            .bind(&entry.content)
            .bind(&entry.content_hash)
            .bind(entry.line_count as i64)
            .bind(entry.file_size as i64)
            .bind(Self::to_millis(&entry.retrieved_at))
            .execute(&mut *tx)
            .await?;
        }

        for change in changes {
            sqlx::query(
                r#"
                INSERT INTO detected_changes (run_id, change_type, severity, description, log_path)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(change.change_type.to_string())
            .bind(change.severity.to_string())
            .bind(&change.description)
            .bind(&change.log_path)
            .execute(&mut *tx)
            .await?;
        }

        for update in baselines {
            sqlx::query(
                "UPDATE baselines SET is_active = 0 WHERE host = ? AND path = ? AND is_active = 1",
            )
            .bind(&run.host)
            .bind(&update.path)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO baselines (host, path, content_hash, line_count, created_at, is_active)
                VALUES (?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(&run.host)
            .bind(&update.path)
            .bind(&update.content_hash)
            .bind(update.line_count as i64)
            .bind(Self::to_millis(&Utc::now()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("persisted run {run_id} for {}", run.host);
        Ok(run_id)
    }

    async fn mark_alert_sent(&self, run_id: i64) -> StorageResult<()> {
        let result = sqlx::query("UPDATE monitoring_runs SET alert_sent = 1 WHERE id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::QueryFailed(format!("no run with id {run_id}")));
        }
        Ok(())
    }

    async fn active_baseline(&self, host: &str, path: &str) -> StorageResult<Option<BaselineRow>> {
        let row = sqlx::query(
            "SELECT * FROM baselines WHERE host = ? AND path = ? AND is_active = 1",
        )
        .bind(host)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::baseline_from_row))
    }

    #[instrument(skip(self, content_hash))]
    async fn replace_baseline(
        &self,
        host: &str,
        path: &str,
        content_hash: &str,
        line_count: u64,
    ) -> StorageResult<()> {
        // One unit of work: the prior active row is gone before the new
        // one lands, so the partial unique index never fires.
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE baselines SET is_active = 0 WHERE host = ? AND path = ? AND is_active = 1")
            .bind(host)
            .bind(path)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO baselines (host, path, content_hash, line_count, created_at, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(host)
        .bind(path)
        .bind(content_hash)
        .bind(line_count as i64)
        .bind(Self::to_millis(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("replaced baseline for {host}:{path}");
        Ok(())
    }

    async fn touch_last_seen(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET last_seen = ? WHERE name = ?")
            .bind(Self::to_millis(&at))
            .bind(host)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownHost(host.to_string()));
        }
        Ok(())
    }

    async fn touch_last_report(&self, host: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET last_report_sent = ? WHERE name = ?")
            .bind(Self::to_millis(&at))
            .bind(host)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownHost(host.to_string()));
        }
        Ok(())
    }

    async fn last_site_report(&self, site: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_sent FROM site_reports WHERE site = ?")
            .bind(site)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::from_millis(r.get("last_sent"))))
    }

    async fn touch_site_report(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO site_reports (site, last_sent) VALUES (?, ?)
            ON CONFLICT (site) DO UPDATE SET last_sent = excluded.last_sent
            "#,
        )
        .bind(site)
        .bind(Self::to_millis(&at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn runs_for_host(&self, host: &str, limit: usize) -> StorageResult<Vec<StoredRun>> {
        let rows = sqlx::query(
            "SELECT * FROM monitoring_runs WHERE host = ? ORDER BY run_date DESC, id DESC LIMIT ?",
        )
        .bind(host)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn log_entries_for_run(&self, run_id: i64) -> StorageResult<Vec<LogEntryRow>> {
        let rows = sqlx::query("SELECT * FROM log_entries WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| LogEntryRow {
                path: row.get("path"),
                content: row.get("content"),
                content_hash: row.get("content_hash"),
                line_count: row.get::<i64, _>("line_count") as u64,
                file_size: row.get::<i64, _>("file_size") as u64,
                retrieved_at: Self::from_millis(row.get("retrieved_at")),
            })
            .collect())
    }

    async fn changes_for_run(&self, run_id: i64) -> StorageResult<Vec<DetectedChangeRow>> {
        let rows = sqlx::query("SELECT * FROM detected_changes WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let change_type: String = row.get("change_type");
                let severity: String = row.get("severity");
                Ok(DetectedChangeRow {
                    change_type: ChangeType::from_str(&change_type)
                        .map_err(StorageError::SerializationError)?,
                    severity: Severity::from_str(&severity)
                        .map_err(StorageError::SerializationError)?,
                    description: row.get("description"),
                    log_path: row.get("log_path"),
                })
            })
            .collect()
    }

    async fn baseline_history(&self, host: &str, path: &str) -> StorageResult<Vec<BaselineRow>> {
        let rows = sqlx::query("SELECT * FROM baselines WHERE host = ? AND path = ? ORDER BY id")
            .bind(host)
            .bind(path)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::baseline_from_row).collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM monitoring_runs")
            .fetch_one(&self.pool)
            .await?;
        let run_count: i64 = row.get("count");

        Ok(HealthStatus {
            healthy: true,
            message: "SQLite backend operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "sqlite".to_string()),
                ("db_path".to_string(), self.db_path.clone()),
                ("runs".to_string(), run_count.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
