//! SSH implementation of [`RemoteShell`]
//!
//! Wraps libssh2 (via the `ssh2` crate) behind `spawn_blocking`, since the
//! binding is synchronous. The session lives in an `Arc<Mutex<_>>` so the
//! blocking closures can own a handle to it.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, instrument, trace};

use super::shell::{CommandOutput, RemoteShell, ShellError};

/// libssh2's LIBSSH2_ERROR_TIMEOUT session error code.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Public-key-authenticated SSH session to one host.
pub struct SshSession {
    hostname: String,
    port: u16,
    user: String,
    key_path: Option<PathBuf>,
    connect_timeout: Duration,
    session: Option<Arc<Mutex<Session>>>,
}

impl SshSession {
    pub fn new(
        hostname: &str,
        port: u16,
        user: &str,
        key_path: Option<PathBuf>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            user: user.to_string(),
            key_path,
            connect_timeout,
            session: None,
        }
    }

    fn lock_session(
        session: &Arc<Mutex<Session>>,
    ) -> Result<std::sync::MutexGuard<'_, Session>, ShellError> {
        session
            .lock()
            .map_err(|_| ShellError::Protocol("session mutex poisoned".to_string()))
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    #[instrument(skip(self), fields(host = %self.hostname, port = self.port))]
    async fn connect(&mut self) -> Result<(), ShellError> {
        // A missing key artifact is checked up front so the collector can
        // fail fast instead of burning its retry budget.
        if let Some(key) = &self.key_path {
            if !key.exists() {
                return Err(ShellError::MissingKey(key.clone()));
            }
        }

        let addr = format!("{}:{}", self.hostname, self.port);
        let user = self.user.clone();
        let key_path = self.key_path.clone();
        let connect_timeout = self.connect_timeout;

        trace!("opening SSH session to {addr}");

        let session = tokio::task::spawn_blocking(move || -> Result<Session, ShellError> {
            let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
                ShellError::Protocol(format!("{addr} resolved to no addresses"))
            })?;
            let tcp = TcpStream::connect_timeout(&socket_addr, connect_timeout)?;

            let mut session =
                Session::new().map_err(|e| ShellError::Protocol(e.to_string()))?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|e| ShellError::Protocol(e.to_string()))?;

            match &key_path {
                Some(path) => session
                    .userauth_pubkey_file(&user, None, path, None)
                    .map_err(|e| ShellError::Auth(e.to_string()))?,
                None => session
                    .userauth_agent(&user)
                    .map_err(|e| ShellError::Auth(e.to_string()))?,
            }

            if !session.authenticated() {
                return Err(ShellError::Auth(format!(
                    "remote host rejected credentials for user {user}"
                )));
            }

            Ok(session)
        })
        .await
        .map_err(|e| ShellError::Protocol(format!("connect task panicked: {e}")))??;

        debug!("SSH session established");
        self.session = Some(Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || {
                if let Ok(session) = session.lock() {
                    let _ = session.disconnect(None, "monitoring cycle complete", None);
                }
            })
            .await;
            debug!("SSH session closed");
        }
    }

    #[instrument(skip(self, command), fields(host = %self.hostname))]
    async fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ShellError> {
        let Some(session) = self.session.clone() else {
            return Err(ShellError::Protocol("no active session".to_string()));
        };

        let command = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<CommandOutput, ShellError> {
            let session = Self::lock_session(&session)?;
            session.set_timeout(timeout.as_millis() as u32);

            let mut channel = session.channel_session().map_err(|e| {
                if e.code() == ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) {
                    ShellError::Timeout(timeout)
                } else {
                    ShellError::Protocol(e.to_string())
                }
            })?;

            channel
                .exec(&command)
                .map_err(|e| ShellError::Protocol(e.to_string()))?;

            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;

            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;

            let _ = channel.wait_close();
            let exit_code = channel.exit_status().unwrap_or(-1);

            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            })
        })
        .await
        .map_err(|e| ShellError::Protocol(format!("exec task panicked: {e}")))?
    }
}
