//! Runs the deploy command on the remote host and streams its output.
//!
//! One call to [`RemoteExecutor::run`] walks connect, authenticate, exec,
//! stream, exit status and close. Every step is published to the log bus and
//! the run state is always finalized, including when the body panics.

use std::sync::Arc;

use tracing::{debug, info_span, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::bus::LogLevel;
use super::context::DeployContext;
use super::transport::{
    login_shell_command, Connector, RemoteSession, SshTarget, TransportError,
};
use super::{RunFailure, RunOutcome};

const SEPARATOR_WIDTH: usize = 60;

/// Everything needed to run one deployment.
#[derive(Clone)]
pub struct DeployJob {
    pub target: SshTarget,
    pub username: String,
    pub password: Zeroizing<String>,
    /// Remote working directory.
    pub path: String,
    /// Command run from `path` inside a login shell.
    pub script: String,
}

impl DeployJob {
    /// The full command line sent to the remote host.
    pub fn command(&self) -> String {
        login_shell_command(&self.path, &self.script)
    }
}

impl std::fmt::Debug for DeployJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployJob")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .field("script", &self.script)
            .finish()
    }
}

/// Executes a [`DeployJob`] over a [`Connector`], reporting into a
/// [`DeployContext`].
///
/// `run` blocks for the whole deployment; call it from a blocking thread.
pub struct RemoteExecutor {
    ctx: Arc<DeployContext>,
    connector: Arc<dyn Connector>,
    job: DeployJob,
}

impl RemoteExecutor {
    pub fn new(ctx: Arc<DeployContext>, connector: Arc<dyn Connector>, job: DeployJob) -> Self {
        Self {
            ctx,
            connector,
            job,
        }
    }

    pub fn job(&self) -> &DeployJob {
        &self.job
    }

    /// Run the deployment to completion. Expects the run to have been begun
    /// via [`DeployContext::begin_run`]; never returns an unfinalized run.
    pub fn run(&self) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("deploy", %run_id, remote = %self.job.target);
        let _enter = span.enter();

        let mut guard = RunGuard {
            ctx: &self.ctx,
            session: None,
            finished: false,
        };

        let outcome = self.execute(&mut guard.session);
        if let Err(failure) = &outcome {
            // Remote command failures already logged their own line.
            if !matches!(failure, RunFailure::Command(_) | RunFailure::Signal(_)) {
                self.ctx.bus.log(LogLevel::Error, failure.to_string());
            }
        }
        guard.finish(&outcome);
        outcome
    }

    fn execute(&self, slot: &mut Option<Box<dyn RemoteSession>>) -> RunOutcome {
        let bus = &self.ctx.bus;
        let job = &self.job;

        bus.log(LogLevel::Info, "Starting deployment");
        bus.log(LogLevel::Info, format!("Target: {}@{}", job.username, job.target));
        bus.log(LogLevel::Info, "Opening SSH connection");

        debug!("connecting");
        let session = slot.insert(self.connector.connect(&job.target)?);
        session.authenticate(&job.username, &job.password)?;
        debug!("authenticated");
        bus.log(LogLevel::Success, "SSH connection established");

        let command = job.command();
        bus.log(LogLevel::Info, format!("Working directory: {}", job.path));
        bus.log(LogLevel::Info, format!("Executing: {command}"));
        bus.log(LogLevel::Info, "=".repeat(SEPARATOR_WIDTH));

        let mut channel = session.exec_pty(&command)?;
        debug!("executing");
        while let Some(line) = channel.read_line()? {
            let line = line.trim();
            if !line.is_empty() {
                bus.log(LogLevel::Output, line);
            }
        }

        let code = match channel.exit_status() {
            Ok(code) => code,
            Err(TransportError::Signal(signal)) => {
                debug!(%signal, "remote command killed");
                bus.log(LogLevel::Info, "=".repeat(SEPARATOR_WIDTH));
                bus.log(LogLevel::Error, format!("Script terminated by signal {signal}"));
                return Err(RunFailure::Signal(signal));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(code, "remote command exited");
        bus.log(LogLevel::Info, "=".repeat(SEPARATOR_WIDTH));

        if code == 0 {
            bus.log(LogLevel::Success, "Script completed successfully");
            return Ok(());
        }

        let stderr = channel.read_stderr().unwrap_or_else(|e| {
            warn!(error = %e, "could not read remote stderr");
            String::new()
        });
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            bus.log(LogLevel::Error, format!("Error output: {stderr}"));
        }
        bus.log(LogLevel::Error, format!("Script failed (exit code {code})"));
        Err(RunFailure::Command(code))
    }
}

/// Closes the session and finalizes the run state exactly once, on the
/// normal path via [`RunGuard::finish`] or on unwind via `Drop`.
struct RunGuard<'a> {
    ctx: &'a DeployContext,
    session: Option<Box<dyn RemoteSession>>,
    finished: bool,
}

impl RunGuard<'_> {
    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.ctx.bus.log(LogLevel::Info, "SSH connection closed");
    }

    fn finish(&mut self, outcome: &RunOutcome) {
        self.close_session();
        self.ctx.finish_run(outcome);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let failure = RunFailure::Unexpected("executor panicked".to_string());
        self.ctx.bus.log(LogLevel::Error, failure.to_string());
        self.close_session();
        self.ctx.finish_run(&Err(failure));
    }
}
