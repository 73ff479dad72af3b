//! Shared deployment context: the log bus plus the run state, and the
//! composite operations that must hold the run-state lock across both.

use chrono::Local;

use super::bus::{LogBus, LogLevel};
use super::status::{RunState, RunStatus};
use super::{DeployError, RunOutcome};

/// Process-wide state shared by the coordinator, the executor and the HTTP
/// layer. Construct once and hand out behind an `Arc`.
#[derive(Debug, Default)]
pub struct DeployContext {
    pub bus: LogBus,
    pub status: RunStatus,
}

impl DeployContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot of the run state.
    pub fn snapshot(&self) -> RunState {
        self.status.read()
    }

    /// Atomically check that nothing is running, flip to running and clear
    /// the log bus.
    ///
    /// The bus reset happens under the run-state lock, so it cannot interleave
    /// with [`finish_run`](Self::finish_run) of the previous run.
    pub fn begin_run(&self) -> Result<(), DeployError> {
        let mut state = self.status.lock();
        if state.running {
            return Err(DeployError::AlreadyRunning);
        }
        state.begin(Local::now());
        self.bus.reset();
        Ok(())
    }

    /// Record the outcome and publish the closing summary record.
    ///
    /// Only the first call per run has any effect; returns whether this call
    /// finalized the run.
    pub fn finish_run(&self, outcome: &RunOutcome) -> bool {
        let mut state = self.status.lock();
        let error = outcome.as_ref().err().map(ToString::to_string);
        if !state.finish(outcome.is_ok(), error, Local::now()) {
            return false;
        }
        match outcome {
            Ok(()) => self.bus.log(LogLevel::Success, "Deployment succeeded"),
            Err(_) => self.bus.log(LogLevel::Warning, "Deployment finished with errors"),
        }
        true
    }
}
