//! Run state of the current (or most recent) deployment.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Snapshot of a deployment attempt, as served by `GET /api/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunState {
    pub running: bool,
    pub success: bool,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
}

impl RunState {
    /// Mark a new attempt as started. Clears the previous outcome.
    pub fn begin(&mut self, now: DateTime<Local>) {
        self.running = true;
        self.success = false;
        self.error = None;
        self.start_time = Some(now);
        self.end_time = None;
    }

    /// Record the outcome of the running attempt.
    ///
    /// Returns `false` (and changes nothing) when no attempt is running, so a
    /// second finalize of the same run is a no-op.
    pub fn finish(&mut self, success: bool, error: Option<String>, now: DateTime<Local>) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.success = success;
        self.error = error;
        self.end_time = Some(now);
        true
    }
}

/// Lock-guarded [`RunState`]. Every read returns a whole snapshot.
#[derive(Debug, Default)]
pub struct RunStatus {
    inner: Mutex<RunState>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of the current state.
    pub fn read(&self) -> RunState {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    // A panicking executor must still be able to finalize, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
