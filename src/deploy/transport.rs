//! Remote shell primitives: connect, authenticate, exec with a PTY, read.
//!
//! The executor only talks to the traits in this module. [`SshConnector`] is
//! the production backend on top of libssh2; tests drive the executor with
//! scripted in-memory implementations.

use std::io::{BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// libssh2 `LIBSSH2_ERROR_AUTHENTICATION_FAILED`.
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;

/// Terminal type requested for the remote pseudo-terminal.
const PTY_TERM: &str = "xterm";

#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect, DNS resolution, or connect timeout.
    #[error("cannot reach {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// SSH handshake or channel-level failure.
    #[error("{0}")]
    Protocol(String),

    /// Credentials rejected by the server.
    #[error("authentication rejected for user {username}")]
    Authentication { username: String },

    /// The remote command was killed by a signal and reported no exit code.
    #[error("remote command terminated by signal {0}")]
    Signal(String),

    /// Stream read failure after the command started.
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ssh2::Error> for TransportError {
    fn from(e: ssh2::Error) -> Self {
        TransportError::Protocol(e.message().to_string())
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens remote sessions. Shared by every run, so it must be `Sync`.
pub trait Connector: Send + Sync + 'static {
    /// Open the transport and complete the protocol handshake.
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// One open remote session, exclusively owned by the executing run.
pub trait RemoteSession: Send {
    /// Password authentication. No agent, no key files.
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TransportError>;

    /// Allocate a pseudo-terminal and start `command`.
    fn exec_pty(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, TransportError>;

    /// Tear the session down. Errors are swallowed; the session is gone either way.
    fn close(&mut self);
}

/// A running remote command.
pub trait RemoteChannel: Send {
    /// Next line of stdout as it arrives, without the line terminator.
    /// `Ok(None)` at end of stream.
    fn read_line(&mut self) -> Result<Option<String>, TransportError>;

    /// Whatever the command wrote to stderr.
    fn read_stderr(&mut self) -> Result<String, TransportError>;

    /// Wait for the command to exit and return its status code.
    /// A command ended by a signal is [`TransportError::Signal`].
    fn exit_status(&mut self) -> Result<i32, TransportError>;
}

// ---------------------------------------------------------------------------
// libssh2 backend
// ---------------------------------------------------------------------------

/// [`Connector`] backed by the `ssh2` crate.
///
/// Host keys are accepted without verification.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, TransportError> {
        let addr = target.to_string();
        let connect_err = |reason: String| TransportError::Connect {
            addr: addr.clone(),
            reason,
        };

        let candidates = resolve(target).map_err(connect_err)?;

        let mut last_err = None;
        let mut tcp = None;
        for sock_addr in candidates {
            match TcpStream::connect_timeout(&sock_addr, target.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(%sock_addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let tcp = tcp.ok_or_else(|| {
            connect_err(
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses resolved".to_string()),
            )
        })?;

        let mut session = ssh2::Session::new()?;
        session.set_timeout(millis(target.connect_timeout));
        session.set_tcp_stream(tcp);
        session.handshake()?;
        debug!(%addr, "ssh handshake complete");

        Ok(Box::new(SshSession { session }))
    }
}

/// Resolve the target host within `connect_timeout`.
///
/// The system resolver has no timeout of its own, so the lookup runs on a
/// helper thread. A lookup that outlives the deadline is abandoned.
fn resolve(target: &SshTarget) -> Result<Vec<SocketAddr>, String> {
    let (tx, rx) = mpsc::channel();
    let host = target.host.clone();
    let port = target.port;
    std::thread::Builder::new()
        .name("ssh-resolve".into())
        .spawn(move || {
            let resolved = (host.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(resolved);
        })
        .map_err(|e| e.to_string())?;

    match rx.recv_timeout(target.connect_timeout) {
        Ok(Ok(addrs)) => Ok(addrs),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "name resolution timed out after {}s",
            target.connect_timeout.as_secs()
        )),
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

struct SshSession {
    session: ssh2::Session,
}

impl RemoteSession for SshSession {
    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        let rejected = || TransportError::Authentication {
            username: username.to_string(),
        };

        match self.session.userauth_password(username, password) {
            Ok(()) if self.session.authenticated() => {}
            Ok(()) => return Err(rejected()),
            Err(e)
                if matches!(
                    e.code(),
                    ssh2::ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
                ) =>
            {
                return Err(rejected())
            }
            Err(e) => return Err(e.into()),
        }

        // No read timeout once authenticated: the command may be silent for long stretches.
        self.session.set_timeout(0);
        Ok(())
    }

    fn exec_pty(&mut self, command: &str) -> Result<Box<dyn RemoteChannel>, TransportError> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty(PTY_TERM, None, None)?;
        channel.exec(command)?;
        Ok(Box::new(SshChannel {
            stdout: BufReader::new(channel),
        }))
    }

    fn close(&mut self) {
        if let Err(e) = self.session.disconnect(None, "deployment finished", None) {
            debug!(error = %e, "ssh disconnect failed");
        }
    }
}

struct SshChannel {
    stdout: BufReader<ssh2::Channel>,
}

impl RemoteChannel for SshChannel {
    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut buf = Vec::new();
        if self.stdout.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn read_stderr(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        self.stdout.get_mut().stderr().read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn exit_status(&mut self) -> Result<i32, TransportError> {
        let channel = self.stdout.get_mut();
        channel.wait_close()?;
        let signal = channel.exit_signal()?.exit_signal;
        exit_code(channel.exit_status()?, signal)
    }
}

/// Combine libssh2's exit code and exit signal into one result.
///
/// libssh2 reports code 0 when the server only sent `exit-signal`, so a
/// signal always wins over the code.
fn exit_code(code: i32, signal: Option<String>) -> Result<i32, TransportError> {
    match signal {
        Some(signal) => Err(TransportError::Signal(signal)),
        None => Ok(code),
    }
}

/// Build the login-shell invocation that runs `script` from `dir`.
///
/// The inner command is single-quoted, so embedded single quotes are closed,
/// escaped and reopened.
pub fn login_shell_command(dir: &str, script: &str) -> String {
    let inner = format!("cd {dir} && {script}");
    format!("bash -l -c '{}'", inner.replace('\'', r"'\''"))
}
