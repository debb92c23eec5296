//! Concurrent execution of one batch with order-preserving result slots.

pub mod slots;
pub mod worker_pool;

pub use slots::{ResultSlots, SlotError};
pub use worker_pool::WorkerPool;
