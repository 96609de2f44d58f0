//! Remote log collection
//!
//! Authenticates to a single remote host, retries with exponential
//! backoff, and retrieves the contents of a list of log file paths with
//! content hash, line count, and byte size. Glob-style patterns are
//! expanded on the remote side before retrieval.
//!
//! Per-file problems never abort a batch: an unreadable file becomes an
//! `Inaccessible` record, a mid-read transport fault becomes a `Failed`
//! record, and the caller receives every result in input order.

pub mod error;
pub mod shell;
pub mod ssh;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, instrument, trace, warn};

pub use error::CollectorError;
pub use shell::{CommandOutput, RemoteShell, ShellError};
pub use ssh::SshSession;

/// What happened when one concrete path was retrieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetrievalOutcome {
    /// Full content retrieved with its fingerprint metadata.
    Retrieved {
        content: String,
        content_hash: String,
        line_count: u64,
        file_size: u64,
    },

    /// The readability probe failed - expected, non-fatal per-file
    /// condition (missing file, permission denied).
    Inaccessible { reason: String },

    /// The retrieval itself failed (transport fault mid-read), caught so
    /// the rest of the batch proceeds.
    Failed { error: String },
}

/// One retrieval result for one concrete path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRetrieval {
    pub path: String,
    pub outcome: RetrievalOutcome,
    pub retrieved_at: DateTime<Utc>,
}

impl LogRetrieval {
    /// Retrieved content, if any. Inaccessible and failed retrievals are
    /// skipped by change detection and baseline updates.
    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            RetrievalOutcome::Retrieved { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn content_hash(&self) -> Option<&str> {
        match &self.outcome {
            RetrievalOutcome::Retrieved { content_hash, .. } => Some(content_hash),
            _ => None,
        }
    }
}

/// Stable SHA-256 fingerprint of a file's contents, hex-encoded.
/// Identical across the baseline-write and diff-read paths.
pub fn content_fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Wrap a path in single quotes for the remote shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

/// Backslash-escape shell metacharacters in a glob pattern while leaving
/// the glob syntax itself (`*`, `?`, `[`, `]`) for the remote shell to
/// expand. Single-quoting would defeat the expansion.
fn glob_quote(pattern: &str) -> String {
    let mut quoted = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        let safe = c.is_ascii_alphanumeric()
            || matches!(c, '*' | '?' | '[' | ']' | '/' | '.' | '-' | '_');
        if !safe {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// Collects log files from one remote host over a [`RemoteShell`] session.
///
/// The session is a scoped resource: the pipeline acquires it at the start
/// of a host run and releases it on every exit path, including failure.
pub struct RemoteCollector {
    host_name: String,
    shell: Box<dyn RemoteShell>,
    command_timeout: Duration,
    connected: bool,
}

impl RemoteCollector {
    pub fn new(host_name: &str, shell: Box<dyn RemoteShell>, command_timeout: Duration) -> Self {
        Self {
            host_name: host_name.to_string(),
            shell,
            command_timeout,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Attempt authentication up to `max_retries` times.
    ///
    /// Transient failures (auth, protocol, OS-level faults) sleep
    /// 1, 2, 4, ... seconds between attempts - n-1 sleeps for n attempts.
    /// A missing key artifact fails immediately without retry.
    #[instrument(skip(self), fields(host = %self.host_name))]
    pub async fn connect(&mut self, max_retries: u32) -> Result<(), CollectorError> {
        let max_retries = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            match self.shell.connect().await {
                Ok(()) => {
                    debug!("connected on attempt {attempt}");
                    self.connected = true;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!("connection attempt {attempt}/{max_retries} failed: {e}");
                    last_error = e.to_string();
                    if attempt < max_retries {
                        let backoff = Duration::from_secs(1 << (attempt - 1));
                        trace!("backing off {backoff:?} before retry");
                        sleep(backoff).await;
                    }
                }
                Err(e) => {
                    warn!("connection failed without retry: {e}");
                    return Err(CollectorError::Connection {
                        host: self.host_name.clone(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        Err(CollectorError::Connection {
            host: self.host_name.clone(),
            attempts: max_retries,
            last_error,
        })
    }

    /// Idempotent; safe to call when never connected.
    pub async fn disconnect(&mut self) {
        if self.connected {
            self.shell.disconnect().await;
            self.connected = false;
        }
    }

    /// Execute a command on the remote host. Transport failures surface
    /// as `Retrieval` errors and are not retried here.
    pub async fn execute_command(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CollectorError> {
        if !self.connected {
            return Err(CollectorError::NotConnected);
        }

        self.shell
            .exec(command, timeout)
            .await
            .map_err(|e| CollectorError::Retrieval {
                subject: command.to_string(),
                message: e.to_string(),
            })
    }

    /// Retrieve one concrete file: readability probe first, then full
    /// content with fingerprint metadata.
    #[instrument(skip(self), fields(host = %self.host_name))]
    pub async fn retrieve_log_file(&mut self, path: &str) -> Result<LogRetrieval, CollectorError> {
        let timeout = self.command_timeout;

        let probe = self
            .execute_command(&format!("test -r {}", shell_quote(path)), timeout)
            .await?;

        if !probe.success() {
            trace!("{path}: not accessible");
            return Ok(LogRetrieval {
                path: path.to_string(),
                outcome: RetrievalOutcome::Inaccessible {
                    reason: "not accessible".to_string(),
                },
                retrieved_at: Utc::now(),
            });
        }

        let read = self
            .execute_command(&format!("cat {}", shell_quote(path)), timeout)
            .await?;

        if !read.success() {
            // Probe passed but the read did not; the file changed under us.
            return Err(CollectorError::Retrieval {
                subject: path.to_string(),
                message: if read.stderr.is_empty() {
                    format!("read exited with code {}", read.exit_code)
                } else {
                    read.stderr.trim().to_string()
                },
            });
        }

        let content = read.stdout;
        let content_hash = content_fingerprint(&content);
        let line_count = content.lines().count() as u64;
        let file_size = content.len() as u64;

        trace!("{path}: retrieved {file_size} bytes, {line_count} lines");

        Ok(LogRetrieval {
            path: path.to_string(),
            outcome: RetrievalOutcome::Retrieved {
                content,
                content_hash,
                line_count,
                file_size,
            },
            retrieved_at: Utc::now(),
        })
    }

    /// Expand a glob pattern on the remote side into concrete paths.
    /// An empty expansion is zero results, not an error.
    async fn expand_pattern(&mut self, pattern: &str) -> Result<Vec<String>, CollectorError> {
        let output = self
            .execute_command(
                &format!("ls -1d -- {} 2>/dev/null", glob_quote(pattern)),
                self.command_timeout,
            )
            .await?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Retrieve every configured path pattern, expanding globs and
    /// converting per-path failures into `Failed` records so one bad path
    /// never aborts the batch. Results preserve input order; nothing is
    /// silently dropped.
    #[instrument(skip(self, patterns), fields(host = %self.host_name, patterns = patterns.len()))]
    pub async fn retrieve_multiple_paths(
        &mut self,
        patterns: &[String],
    ) -> Result<Vec<LogRetrieval>, CollectorError> {
        if !self.connected {
            return Err(CollectorError::NotConnected);
        }

        let mut results = Vec::new();

        for pattern in patterns {
            if is_glob(pattern) {
                match self.expand_pattern(pattern).await {
                    Ok(concrete_paths) => {
                        debug!("{pattern}: expanded to {} path(s)", concrete_paths.len());
                        for path in concrete_paths {
                            results.push(self.retrieve_caught(&path).await?);
                        }
                    }
                    Err(CollectorError::NotConnected) => return Err(CollectorError::NotConnected),
                    Err(e) => {
                        warn!("{pattern}: expansion failed: {e}");
                        results.push(LogRetrieval {
                            path: pattern.clone(),
                            outcome: RetrievalOutcome::Failed {
                                error: e.to_string(),
                            },
                            retrieved_at: Utc::now(),
                        });
                    }
                }
            } else {
                results.push(self.retrieve_caught(pattern).await?);
            }
        }

        Ok(results)
    }

    /// Retrieve one path, converting a `Retrieval` error into a `Failed`
    /// record. Sequencing faults still propagate.
    async fn retrieve_caught(&mut self, path: &str) -> Result<LogRetrieval, CollectorError> {
        match self.retrieve_log_file(path).await {
            Ok(retrieval) => Ok(retrieval),
            Err(CollectorError::NotConnected) => Err(CollectorError::NotConnected),
            Err(e) => {
                warn!("{path}: retrieval failed: {e}");
                Ok(LogRetrieval {
                    path: path.to_string(),
                    outcome: RetrievalOutcome::Failed {
                        error: e.to_string(),
                    },
                    retrieved_at: Utc::now(),
                })
            }
        }
    }
}
