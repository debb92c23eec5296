//! The batch dispatch engine: run control, paging, progress, and the event
//! stream exposed to callers.

pub mod batch;
pub mod controller;
pub mod engine;
pub mod events;
pub mod progress;
mod run_loop;

pub use batch::{batch_size_for, PageCursor};
pub use controller::{ControlError, RunController, RunCounters, RunState, RunStatus};
pub use engine::DispatchEngine;
pub use events::{DispatchEvent, EventBus, ProgressUpdate, RunOutcome, RunSummary};
pub use progress::{estimate_eta, ProgressTracker};
