//! Single-flight remote deployment: log bus, run state, SSH executor and the
//! coordinator that gates new runs.

pub mod bus;
pub mod context;
pub mod coordinator;
pub mod executor;
pub mod status;
pub mod transport;

pub use self::bus::{LogBus, LogLevel, LogRecord};
pub use self::context::DeployContext;
pub use self::coordinator::Deployer;
pub use self::executor::{DeployJob, RemoteExecutor};
pub use self::status::{RunState, RunStatus};

use self::transport::TransportError;
use thiserror::Error;

/// Errors surfaced synchronously to whoever asked for a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("a deployment is already in progress")]
    AlreadyRunning,
}

/// Why a run ended unsuccessfully. The `Display` text is what lands in
/// `RunState::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    /// Credentials rejected. Points at configuration, not the network.
    #[error("SSH authentication failed: invalid username or password")]
    Authentication,

    #[error("SSH connection error: {0}")]
    Connection(String),

    /// The remote command ran and exited non-zero.
    #[error("script exited with code {0}")]
    Command(i32),

    /// The remote command was killed by a signal before reporting an exit code.
    #[error("script terminated by signal {0}")]
    Signal(String),

    #[error("deployment failed: {0}")]
    Unexpected(String),
}

impl From<TransportError> for RunFailure {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Authentication { .. } => RunFailure::Authentication,
            TransportError::Connect { .. } | TransportError::Protocol(_) => {
                RunFailure::Connection(e.to_string())
            }
            TransportError::Signal(signal) => RunFailure::Signal(signal),
            TransportError::Io(_) => RunFailure::Unexpected(e.to_string()),
        }
    }
}

/// Result of one deployment run.
pub type RunOutcome = Result<(), RunFailure>;
