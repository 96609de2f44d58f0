use std::path::PathBuf;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence across invocations)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./logvigil.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub hosts: Vec<HostConfig>,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    pub alerting: Option<AlertingConfig>,

    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// One remote host to monitor, as supplied by the configuration source.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostConfig {
    /// Unique identity of the host within the fleet.
    pub name: String,
    /// Network address the SSH session connects to.
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Private key used for public-key authentication. Falls back to the
    /// running user's ssh-agent when absent.
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Optional site grouping for site-level reports and overrides.
    pub site: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Log path patterns to retrieve each cycle; may contain glob wildcards
    /// which are expanded on the remote side.
    pub logs: Vec<String>,
    /// Host-level report frequency override (hourly|daily|weekly|monthly).
    pub report_frequency: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    /// Upper bound on hosts monitored in parallel within one cycle.
    #[serde(default = "default_max_concurrent_hosts")]
    pub max_concurrent_hosts: usize,

    /// Connection attempts before a host-cycle is declared failed.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Per-command execution timeout in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_concurrent_hosts: default_max_concurrent_hosts(),
            connect_retries: default_connect_retries(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertingConfig {
    /// Detailed channel: webhook endpoint receiving the full structured
    /// alert (an email gateway in the reference deployment).
    pub webhook_url: String,
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Abbreviated channel: push gateway endpoint. Alerts are only pushed
    /// when this is present.
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReportingConfig {
    /// Fleet-wide default report frequency.
    #[serde(default = "default_report_frequency")]
    pub default_frequency: String,

    /// Site-level frequency overrides, keyed by site name.
    #[serde(default)]
    pub site_frequencies: std::collections::HashMap<String, String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            default_frequency: default_report_frequency(),
            site_frequencies: Default::default(),
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent_hosts() -> usize {
    5
}

fn default_connect_retries() -> u32 {
    3
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_report_frequency() -> String {
    "daily".to_string()
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}
