//! Bounded-width fan-out of one batch across concurrent senders.
//!
//! Tasks are seeded into a channel up front and workers pop from the shared
//! receiver until it drains. Results travel back tagged with their batch
//! index and land in a [`ResultSlots`] buffer, so the returned vector always
//! matches input order.

use super::slots::ResultSlots;
use crate::delivery::sender::{DispatchTask, RetryingSender};
use crate::recipients::{DispatchResult, Recipient};
use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type SharedTaskQueue = Arc<Mutex<mpsc::Receiver<DispatchTask>>>;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    width: usize,
    sender: RetryingSender,
}

impl WorkerPool {
    pub fn new(width: usize, sender: RetryingSender) -> Self {
        Self {
            width: width.max(1),
            sender,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Workers spawned for a batch of `len` recipients.
    pub fn workers_for(&self, len: usize) -> usize {
        self.width.min(len)
    }

    /// Dispatches every recipient and returns one result per input, in input
    /// order. Returns only after all workers have exited.
    ///
    /// Per-recipient failures are inside the results; an error here means a
    /// worker panicked or the pool's own plumbing broke.
    pub async fn run_batch(&self, batch: Vec<Recipient>) -> Result<Vec<DispatchResult>> {
        let len = batch.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let (task_tx, task_rx) = mpsc::channel(len);
        for (index, recipient) in batch.into_iter().enumerate() {
            task_tx
                .send(DispatchTask::new(index, recipient))
                .await
                .map_err(|_| anyhow!("task queue closed while seeding batch"))?;
        }
        drop(task_tx);

        let queue: SharedTaskQueue = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel(len);
        let workers = self.workers_for(len);

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let result_tx = result_tx.clone();
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    std::panic::AssertUnwindSafe(run_worker(worker_id, queue, result_tx, sender))
                        .catch_unwind()
                        .await
                })
            })
            .collect();
        drop(result_tx);

        tracing::debug!(batch = len, workers, "batch fanned out");

        let mut failures = Vec::new();
        for (worker_id, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(processed)) => {
                    tracing::trace!(worker = worker_id, processed, "worker drained queue");
                }
                Ok(Err(panic_payload)) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        worker = worker_id,
                        panic = %panic_msg,
                        "worker task panicked"
                    );
                    failures.push(format!("worker {worker_id} panicked: {panic_msg}"));
                }
                Err(err) => {
                    tracing::error!(worker = worker_id, error = %err, "worker task failed to join");
                    failures.push(format!("worker {worker_id} failed to join: {err}"));
                }
            }
        }

        if let Some(first) = failures.into_iter().next() {
            return Err(anyhow!(first));
        }

        let mut slots = ResultSlots::new(len);
        while let Some((index, result)) = result_rx.recv().await {
            slots
                .fill(index, result)
                .context("worker produced an invalid result index")?;
        }

        slots
            .into_results()
            .context("batch finished with unfilled result slots")
    }
}

#[tracing::instrument(level = "trace", skip_all, fields(worker = worker_id))]
async fn run_worker(
    worker_id: usize,
    queue: SharedTaskQueue,
    results: mpsc::Sender<(usize, DispatchResult)>,
    sender: RetryingSender,
) -> usize {
    let mut processed = 0;
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(task) = next else {
            break;
        };

        let result = sender.attempt(&task).await;
        processed += 1;
        if results.send((task.index, result)).await.is_err() {
            tracing::warn!("result channel closed; worker exiting early");
            break;
        }
    }
    processed
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
