use super::progress::format_eta;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

/// Live progress after one page has been written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub run_id: u64,
    pub sent_count: usize,
    pub total_count: usize,
    pub delivered: usize,
    pub failed: usize,
    pub eta_seconds: Option<u64>,
}

impl ProgressUpdate {
    /// Operator-facing status text, e.g. `Sent 75/250 (70 delivered, 5 failed), ETA 12s`.
    pub fn status_line(&self) -> String {
        format!(
            "Sent {}/{} ({} delivered, {} failed), ETA {}",
            self.sent_count,
            self.total_count,
            self.delivered,
            self.failed,
            format_eta(self.eta_seconds)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Started {
        run_id: u64,
        total: usize,
        batch_size: usize,
    },
    Progress(ProgressUpdate),
    Paused {
        run_id: u64,
    },
    Resumed {
        run_id: u64,
    },
    Completed {
        run_id: u64,
        delivered: usize,
        failed: usize,
    },
    Stopped {
        run_id: u64,
    },
    Failed {
        run_id: u64,
        error: String,
    },
}

impl DispatchEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            DispatchEvent::Started { run_id, .. }
            | DispatchEvent::Paused { run_id }
            | DispatchEvent::Resumed { run_id }
            | DispatchEvent::Completed { run_id, .. }
            | DispatchEvent::Stopped { run_id }
            | DispatchEvent::Failed { run_id, .. } => *run_id,
            DispatchEvent::Progress(update) => update.run_id,
        }
    }

    /// True for the events after which the run is back to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchEvent::Completed { .. }
                | DispatchEvent::Stopped { .. }
                | DispatchEvent::Failed { .. }
        )
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Stopped(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Stopped(summary) => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: u64,
    pub total: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Fan-out of [`DispatchEvent`]s to any number of subscribers. Emitting with
/// no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DispatchEvent) {
        tracing::trace!(?event, "dispatch event");
        let _ = self.tx.send(event);
    }
}
