//! The run state machine. Every transition goes through one mutex and is
//! published on a watch channel, so the run loop can park on pause without
//! polling and observers always see transitions in order.

use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Sending,
    Paused,
}

impl RunState {
    pub fn is_active(self) -> bool {
        !matches!(self, RunState::Idle)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Sending => "sending",
            RunState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// State plus the id of the run it belongs to. `run_id` is 0 until the
/// first run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub run_id: u64,
    pub state: RunState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub sent: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("a run is already active (state: {0})")]
    AlreadyActive(RunState),
    #[error("no run is active")]
    NotActive,
}

#[derive(Debug)]
struct ControllerInner {
    status: RunStatus,
    counters: RunCounters,
}

#[derive(Debug)]
pub struct RunController {
    inner: Mutex<ControllerInner>,
    status_tx: watch::Sender<RunStatus>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    pub fn new() -> Self {
        let status = RunStatus {
            run_id: 0,
            state: RunState::Idle,
        };
        let (status_tx, _) = watch::channel(status);
        Self {
            inner: Mutex::new(ControllerInner {
                status,
                counters: RunCounters::default(),
            }),
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn state(&self) -> RunState {
        self.lock().status.state
    }

    pub fn counters(&self) -> RunCounters {
        self.lock().counters
    }

    /// Idle -> Sending under a fresh run id.
    pub fn begin(&self) -> Result<u64, ControlError> {
        let mut inner = self.lock();
        if inner.status.state.is_active() {
            return Err(ControlError::AlreadyActive(inner.status.state));
        }
        let run_id = inner.status.run_id.wrapping_add(1);
        inner.counters = RunCounters::default();
        self.transition(&mut inner, run_id, RunState::Sending);
        Ok(run_id)
    }

    /// Returns false when `run_id` is no longer the active run.
    pub fn set_total(&self, run_id: u64, total: usize) -> bool {
        let mut inner = self.lock();
        if !Self::owns(&inner, run_id) {
            return false;
        }
        inner.counters.total = total;
        inner.counters.sent = inner.counters.sent.min(total);
        true
    }

    /// Adds `count` to the sent counter, clamped to the total. `None` means the
    /// run was stopped and the progress was discarded.
    pub fn record_sent(&self, run_id: u64, count: usize) -> Option<RunCounters> {
        let mut inner = self.lock();
        if !Self::owns(&inner, run_id) {
            return None;
        }
        let counters = &mut inner.counters;
        counters.sent = counters.sent.saturating_add(count).min(counters.total);
        Some(*counters)
    }

    /// Sending -> Paused. Returns whether the state changed.
    pub fn pause(&self) -> Result<bool, ControlError> {
        let mut inner = self.lock();
        match inner.status.state {
            RunState::Idle => Err(ControlError::NotActive),
            RunState::Paused => Ok(false),
            RunState::Sending => {
                let run_id = inner.status.run_id;
                self.transition(&mut inner, run_id, RunState::Paused);
                Ok(true)
            }
        }
    }

    /// Paused -> Sending. Returns whether the state changed.
    pub fn resume(&self) -> Result<bool, ControlError> {
        let mut inner = self.lock();
        match inner.status.state {
            RunState::Idle => Err(ControlError::NotActive),
            RunState::Sending => Ok(false),
            RunState::Paused => {
                let run_id = inner.status.run_id;
                self.transition(&mut inner, run_id, RunState::Sending);
                Ok(true)
            }
        }
    }

    pub fn toggle_pause(&self) -> Result<RunState, ControlError> {
        let mut inner = self.lock();
        let next = match inner.status.state {
            RunState::Idle => return Err(ControlError::NotActive),
            RunState::Sending => RunState::Paused,
            RunState::Paused => RunState::Sending,
        };
        let run_id = inner.status.run_id;
        self.transition(&mut inner, run_id, next);
        Ok(next)
    }

    /// Any active state -> Idle with counters reset. Returns the stopped run id.
    pub fn stop(&self) -> Result<u64, ControlError> {
        let mut inner = self.lock();
        if !inner.status.state.is_active() {
            return Err(ControlError::NotActive);
        }
        let run_id = inner.status.run_id;
        inner.counters = RunCounters::default();
        self.transition(&mut inner, run_id, RunState::Idle);
        Ok(run_id)
    }

    /// Ends `run_id` if it is still active. Used for natural completion and
    /// fatal failures; returns false if the run was already stopped.
    pub fn finish(&self, run_id: u64) -> bool {
        let mut inner = self.lock();
        if !Self::owns(&inner, run_id) {
            return false;
        }
        inner.counters = RunCounters::default();
        self.transition(&mut inner, run_id, RunState::Idle);
        true
    }

    /// Parks while `run_id` is paused. Returns true once it is sending again,
    /// false if it was stopped or replaced.
    pub async fn wait_until_runnable(&self, run_id: u64) -> bool {
        let mut status_rx = self.status_tx.subscribe();
        let status = status_rx
            .wait_for(|status| !(status.run_id == run_id && status.state == RunState::Paused))
            .await
            .map(|status| *status);

        match status {
            Ok(status) => status.run_id == run_id && status.state == RunState::Sending,
            Err(_) => false,
        }
    }

    fn owns(inner: &ControllerInner, run_id: u64) -> bool {
        inner.status.run_id == run_id && inner.status.state.is_active()
    }

    fn transition(&self, inner: &mut ControllerInner, run_id: u64, state: RunState) {
        let previous = inner.status;
        inner.status = RunStatus { run_id, state };
        self.status_tx.send_replace(inner.status);
        tracing::debug!(
            run_id,
            from = %previous.state,
            to = %state,
            "run state transition"
        );
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
