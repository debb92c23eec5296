//! Body of a single run: page, fan out, write back, report, repeat.
//!
//! Pause and stop are only observed between pages. A page that has started
//! always finishes, and its results are written back even if the run was
//! stopped meanwhile.

use super::batch::PageCursor;
use super::controller::RunController;
use super::events::{DispatchEvent, EventBus, ProgressUpdate, RunOutcome, RunSummary};
use super::progress::ProgressTracker;
use crate::pool::WorkerPool;
use crate::recipients::{RecipientId, RecipientPatch, RecipientStore};
use crate::runtime::fatal::{FatalErrorHandler, RunStage};
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) struct RunLoop {
    pub run_id: u64,
    pub total: usize,
    pub batch_size: usize,
    pub store: Arc<dyn RecipientStore>,
    pub pool: WorkerPool,
    pub controller: Arc<RunController>,
    pub events: EventBus,
    pub telemetry: Arc<Telemetry>,
    pub fatal: FatalErrorHandler,
    pub run_token: CancellationToken,
    /// Held for the whole run so two loops never page the store at once.
    pub exclusive: Arc<Mutex<()>>,
}

enum Exit {
    Exhausted,
    Halted,
}

impl RunLoop {
    pub(crate) async fn run(self) -> Result<RunOutcome> {
        let _exclusive = self.exclusive.clone().lock_owned().await;
        let mut progress = ProgressTracker::new();

        tracing::info!(
            run_id = self.run_id,
            total = self.total,
            batch_size = self.batch_size,
            "dispatch run started"
        );

        let exit = self.drive(&mut progress).await;
        self.run_token.cancel();

        let summary = RunSummary {
            run_id: self.run_id,
            total: self.total,
            attempted: progress.attempted(),
            delivered: progress.delivered(),
            failed: progress.failed(),
            elapsed: progress.elapsed(),
        };

        match exit {
            Ok(Exit::Exhausted) if self.controller.finish(self.run_id) => {
                tracing::info!(
                    run_id = self.run_id,
                    delivered = summary.delivered,
                    failed = summary.failed,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "dispatch run completed"
                );
                self.events.emit(DispatchEvent::Completed {
                    run_id: self.run_id,
                    delivered: summary.delivered,
                    failed: summary.failed,
                });
                Ok(RunOutcome::Completed(summary))
            }
            Ok(_) => {
                // cancelled through the token rather than `stop()`
                if self.controller.finish(self.run_id) {
                    self.events.emit(DispatchEvent::Stopped {
                        run_id: self.run_id,
                    });
                }
                tracing::info!(
                    run_id = self.run_id,
                    attempted = summary.attempted,
                    "dispatch run stopped"
                );
                Ok(RunOutcome::Stopped(summary))
            }
            Err(err) => {
                if self.controller.finish(self.run_id) {
                    tracing::warn!(
                        run_id = self.run_id,
                        stage = ?self.fatal.stage(),
                        attempted = summary.attempted,
                        "dispatch run failed"
                    );
                    self.events.emit(DispatchEvent::Failed {
                        run_id: self.run_id,
                        error: format!("{err:#}"),
                    });
                } else {
                    // `stop()` already reported this run as stopped
                    tracing::warn!(
                        run_id = self.run_id,
                        stage = ?self.fatal.stage(),
                        error = %format!("{err:#}"),
                        "write-back of a stopped run failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, progress: &mut ProgressTracker) -> Result<Exit> {
        let mut cursor = PageCursor::new(self.batch_size);

        loop {
            if !self.checkpoint().await {
                return Ok(Exit::Halted);
            }
            if progress.attempted() >= self.total {
                return Ok(Exit::Exhausted);
            }

            let page = self
                .store
                .get_page(cursor.page(), cursor.limit())
                .await
                .map_err(|err| {
                    self.fatal
                        .trigger(RunStage::FetchPage { page: cursor.page() }, err.into())
                })?;
            if page.is_empty() {
                tracing::debug!(
                    run_id = self.run_id,
                    page = cursor.page(),
                    "recipient store exhausted"
                );
                return Ok(Exit::Exhausted);
            }

            let ids: Vec<RecipientId> = page.records.iter().map(|record| record.id).collect();
            let results = self
                .pool
                .run_batch(page.records)
                .await
                .map_err(|err| {
                    self.fatal
                        .trigger(RunStage::Dispatch { page: cursor.page() }, err)
                })?;
            self.telemetry.record_page();

            for (id, result) in ids.iter().copied().zip(results) {
                progress.record(&result);
                self.store
                    .update_record(id, RecipientPatch::outcome(result))
                    .await
                    .map_err(|err| self.fatal.trigger(RunStage::WriteBack { id }, err.into()))?;
            }

            match self.controller.record_sent(self.run_id, ids.len()) {
                Some(counters) => {
                    let update = ProgressUpdate {
                        run_id: self.run_id,
                        sent_count: counters.sent,
                        total_count: counters.total,
                        delivered: progress.delivered(),
                        failed: progress.failed(),
                        eta_seconds: progress.eta_seconds(counters.sent, counters.total),
                    };
                    tracing::info!(
                        run_id = self.run_id,
                        page = cursor.page(),
                        sent = update.sent_count,
                        total = update.total_count,
                        eta_seconds = ?update.eta_seconds,
                        "page dispatched"
                    );
                    self.events.emit(DispatchEvent::Progress(update));
                }
                None => {
                    tracing::debug!(
                        run_id = self.run_id,
                        page = cursor.page(),
                        "run no longer active; discarding page progress"
                    );
                }
            }

            cursor.advance();
        }
    }

    /// Waits out a pause. False once the run should end.
    async fn checkpoint(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.run_token.cancelled() => false,
            runnable = self.controller.wait_until_runnable(self.run_id) => runnable,
        }
    }
}
