use crate::recipients::DispatchResult;
use std::time::Duration;
use tokio::time::Instant;

/// Linear extrapolation of the remaining time, in whole seconds.
///
/// Undefined until at least one recipient has been sent.
pub fn estimate_eta(sent: usize, total: usize, elapsed: Duration) -> Option<u64> {
    if sent == 0 {
        return None;
    }
    let remaining = total.saturating_sub(sent) as f64;
    let eta = remaining * elapsed.as_secs_f64() / sent as f64;
    Some(eta.round() as u64)
}

/// Compact human form: `12s`, `3m 05s`, `2h 07m`.
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        None => "--".to_string(),
        Some(secs) if secs < 60 => format!("{secs}s"),
        Some(secs) if secs < 3_600 => format!("{}m {:02}s", secs / 60, secs % 60),
        Some(secs) => format!("{}h {:02}m", secs / 3_600, (secs % 3_600) / 60),
    }
}

/// Per-run tallies and the clock the ETA is measured against.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    delivered: usize,
    failed: usize,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            delivered: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, result: &DispatchResult) {
        if result.is_sent() {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn eta_seconds(&self, sent: usize, total: usize) -> Option<u64> {
        estimate_eta(sent, total, self.elapsed())
    }
}
