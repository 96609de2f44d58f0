//! Error types for remote collection

use std::fmt;

/// Errors surfaced by the remote collector
#[derive(Debug)]
pub enum CollectorError {
    /// A session could not be established within the retry budget.
    /// Fatal for this host-cycle only.
    Connection {
        host: String,
        attempts: u32,
        last_error: String,
    },

    /// A command was issued without an active session. Sequencing fault
    /// in the caller, not a remote failure.
    NotConnected,

    /// A specific command or file read failed mid-session. Caught
    /// per-path in batch retrieval, per-host in the pipeline; never
    /// retried internally.
    Retrieval { subject: String, message: String },
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::Connection {
                host,
                attempts,
                last_error,
            } => write!(
                f,
                "failed to connect to {} after {} attempt(s): {}",
                host, attempts, last_error
            ),
            CollectorError::NotConnected => {
                write!(f, "command issued without an active session")
            }
            CollectorError::Retrieval { subject, message } => {
                write!(f, "retrieval failed for {}: {}", subject, message)
            }
        }
    }
}

impl std::error::Error for CollectorError {}
