use super::batch::batch_size_for;
use super::controller::{ControlError, RunController, RunCounters, RunState, RunStatus};
use super::events::{DispatchEvent, EventBus, RunOutcome};
use super::run_loop::RunLoop;
use crate::delivery::{DeliveryTransport, MessageRenderer, RetryingSender};
use crate::pool::WorkerPool;
use crate::recipients::RecipientStore;
use crate::runtime::config::DispatchConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::signal;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type RunHandle = JoinHandle<Result<RunOutcome>>;

/// Bulk dispatch engine: owns the run state machine, the collaborators, and
/// the task driving the current run.
///
/// Control calls (`pause`, `resume`, `stop`) are synchronous and take effect
/// at the next page boundary. Outcomes are reported on the event stream and
/// through [`DispatchEngine::wait`].
pub struct DispatchEngine {
    config: DispatchConfig,
    store: Arc<dyn RecipientStore>,
    pool: WorkerPool,
    controller: Arc<RunController>,
    events: EventBus,
    telemetry: Arc<Telemetry>,
    exclusive: Arc<Mutex<()>>,
    run_task: Mutex<Option<RunHandle>>,
    shutdown: StdMutex<CancellationToken>,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn RecipientStore>,
        renderer: Arc<dyn MessageRenderer>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self::with_telemetry(
            config,
            store,
            renderer,
            transport,
            Arc::new(Telemetry::default()),
        )
    }

    pub fn with_telemetry(
        config: DispatchConfig,
        store: Arc<dyn RecipientStore>,
        renderer: Arc<dyn MessageRenderer>,
        transport: Arc<dyn DeliveryTransport>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let sender = RetryingSender::new(
            renderer,
            transport,
            config.retry_policy(),
            telemetry.clone(),
        );
        let pool = WorkerPool::new(config.pool_width(), sender);
        let events = EventBus::new(config.event_capacity());

        Self {
            config,
            store,
            pool,
            controller: Arc::new(RunController::new()),
            events,
            telemetry,
            exclusive: Arc::new(Mutex::new(())),
            run_task: Mutex::new(None),
            shutdown: StdMutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn state(&self) -> RunState {
        self.controller.state()
    }

    pub fn status(&self) -> RunStatus {
        self.controller.status()
    }

    pub fn counters(&self) -> RunCounters {
        self.controller.counters()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.controller.subscribe()
    }

    /// Root token. Cancelling it stops the current run; later runs get a
    /// fresh token once [`DispatchEngine::run_until_ctrl_c`] observes the
    /// cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock_shutdown().clone()
    }

    /// Begins a run from page 1 and returns its id once the run task is
    /// spawned.
    ///
    /// Fails with [`ControlError::AlreadyActive`] unless idle. A store error
    /// while reading the total leaves the engine idle. A run stopped while
    /// its total is being read never starts its loop.
    pub async fn start(&self) -> Result<u64> {
        let mut run_task = self.run_task.lock().await;
        let run_id = self.controller.begin()?;

        let total = match self.store.count().await {
            Ok(total) => total,
            Err(err) => {
                self.controller.finish(run_id);
                let err = anyhow::Error::new(err).context("failed to read recipient total");
                tracing::error!(
                    run_id,
                    error = %format!("{err:#}"),
                    "dispatch run could not start"
                );
                self.events.emit(DispatchEvent::Failed {
                    run_id,
                    error: format!("{err:#}"),
                });
                return Err(err);
            }
        };

        let batch_size = batch_size_for(
            total,
            self.config.max_batch_size(),
            self.config.batch_divisor(),
        );
        if !self.controller.set_total(run_id, total) {
            // stopped while the total was being read; `stop()` reported it
            tracing::debug!(run_id, "run stopped before its first page");
            return Ok(run_id);
        }
        self.events.emit(DispatchEvent::Started {
            run_id,
            total,
            batch_size,
        });

        let run_token = self.cancellation_token().child_token();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );
        let run_loop = RunLoop {
            run_id,
            total,
            batch_size,
            store: self.store.clone(),
            pool: self.pool.clone(),
            controller: self.controller.clone(),
            events: self.events.clone(),
            telemetry: self.telemetry.clone(),
            fatal: FatalErrorHandler::new(run_id, run_token.clone()),
            run_token,
            exclusive: self.exclusive.clone(),
        };

        let handle = tokio::spawn(async move {
            let outcome = run_loop.run().await;
            let _ = reporter.await;
            outcome
        });

        if let Some(previous) = run_task.replace(handle) {
            if !previous.is_finished() {
                tracing::debug!(run_id, "previous run still finishing its last page");
            }
        }

        Ok(run_id)
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        if self.controller.pause()? {
            let run_id = self.controller.status().run_id;
            tracing::info!(run_id, "dispatch paused");
            self.events.emit(DispatchEvent::Paused { run_id });
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        if self.controller.resume()? {
            let run_id = self.controller.status().run_id;
            tracing::info!(run_id, "dispatch resumed");
            self.events.emit(DispatchEvent::Resumed { run_id });
        }
        Ok(())
    }

    /// Flips between sending and paused; returns the new state.
    pub fn toggle_pause(&self) -> Result<RunState, ControlError> {
        let state = self.controller.toggle_pause()?;
        let run_id = self.controller.status().run_id;
        match state {
            RunState::Paused => self.events.emit(DispatchEvent::Paused { run_id }),
            _ => self.events.emit(DispatchEvent::Resumed { run_id }),
        }
        Ok(state)
    }

    /// Returns to idle immediately. The page in flight still finishes and
    /// its results are written, but no further pages are fetched.
    pub fn stop(&self) -> Result<u64, ControlError> {
        let run_id = self.controller.stop()?;
        tracing::info!(run_id, "dispatch stopped");
        self.events.emit(DispatchEvent::Stopped { run_id });
        Ok(run_id)
    }

    /// Joins the most recently started run. `None` if there is nothing to
    /// join.
    pub async fn wait(&self) -> Result<Option<RunOutcome>> {
        let handle = self.run_task.lock().await.take();
        match handle {
            None => Ok(None),
            Some(handle) => handle
                .await
                .context("dispatch run task failed to join")?
                .map(Some),
        }
    }

    /// Starts a run and blocks until it ends, stopping it early on Ctrl-C
    /// (SIGINT) or when the root token is cancelled.
    pub async fn run_until_ctrl_c(&self) -> Result<RunOutcome> {
        self.start().await?;
        let shutdown = self.cancellation_token();
        tracing::info!("dispatch started; waiting for Ctrl-C (SIGINT) to stop the run");

        let wait = self.wait();
        tokio::pin!(wait);

        let token_cancelled = tokio::select! {
            outcome = &mut wait => {
                return outcome?.context("dispatch run vanished before completion");
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; stopping dispatch run");
                false
            }
            _ = shutdown.cancelled() => {
                tracing::info!("dispatch shutdown token cancelled");
                true
            }
        };

        if let Err(err) = self.stop() {
            tracing::debug!(error = %err, "run already idle at shutdown");
        }
        let outcome = wait.await;

        if token_cancelled {
            self.reinitialize_shutdown_token();
        }

        outcome?.context("dispatch run vanished before completion")
    }

    fn reinitialize_shutdown_token(&self) {
        *self.lock_shutdown() = CancellationToken::new();
    }

    fn lock_shutdown(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
