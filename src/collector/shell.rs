//! Remote shell session trait
//!
//! The seam between the collector's retrieval logic and the actual SSH
//! transport. Everything above this trait is exercised in tests with a
//! scripted implementation; the production implementation lives in
//! [`super::ssh`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Captured output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failures beneath the shell seam.
#[derive(Debug)]
pub enum ShellError {
    /// The configured private key does not exist on disk. Never retried.
    MissingKey(PathBuf),

    /// The remote side rejected authentication.
    Auth(String),

    /// SSH protocol-level failure (handshake, channel setup).
    Protocol(String),

    /// OS-level connection fault.
    Io(std::io::Error),

    /// The command did not finish within its timeout.
    Timeout(Duration),
}

impl ShellError {
    /// Whether a connection attempt that failed this way is worth
    /// retrying. Only a missing key artifact is a hard stop: auth,
    /// protocol, and OS-level faults are all treated as transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ShellError::MissingKey(_))
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::MissingKey(path) => {
                write!(f, "private key not found: {}", path.display())
            }
            ShellError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            ShellError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ShellError::Io(err) => write!(f, "connection fault: {}", err),
            ShellError::Timeout(duration) => {
                write!(f, "command timed out after {:?}", duration)
            }
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        ShellError::Io(err)
    }
}

/// One authenticated remote shell session.
///
/// Implementations must be `Send` so a session can live inside the
/// per-host worker task. Connection retry policy is deliberately NOT
/// implemented here - `connect` is a single attempt, and the collector
/// owns backoff and classification.
#[async_trait]
pub trait RemoteShell: Send {
    /// One authentication attempt against the remote host.
    async fn connect(&mut self) -> Result<(), ShellError>;

    /// Tear the session down. Idempotent; safe to call when never
    /// connected.
    async fn disconnect(&mut self);

    /// Execute a command over the established session.
    async fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ShellError>;
}
