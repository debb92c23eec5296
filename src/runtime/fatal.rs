use crate::recipients::RecipientId;
use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Where in the page cycle a run-ending failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    FetchPage { page: usize },
    Dispatch { page: usize },
    WriteBack { id: RecipientId },
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::FetchPage { page } => write!(f, "fetching page {page}"),
            RunStage::Dispatch { page } => write!(f, "dispatching page {page}"),
            RunStage::WriteBack { id } => write!(f, "writing back {id}"),
        }
    }
}

/// Captures the first systemic failure of a run and cancels the run token.
///
/// Store errors and worker panics end the run; per-recipient failures never
/// reach this handler.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    run_id: u64,
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured: Mutex<Option<CapturedFailure>>,
}

#[derive(Clone)]
struct CapturedFailure {
    stage: RunStage,
    error: Arc<AnyError>,
}

/// Shared view of the captured error, so every caller of
/// [`FatalErrorHandler::error`] sees the same chain.
struct SharedError(Arc<AnyError>);

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0.as_ref(), f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0.as_ref(), f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.chain().nth(1)
    }
}

impl FatalErrorHandler {
    pub fn new(run_id: u64, run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                run_id,
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured: Mutex::new(None),
            }),
        }
    }

    /// Tags `error` with `stage` and, if it is the first failure of the run,
    /// logs it and cancels the run. The tagged error is always returned.
    pub fn trigger(&self, stage: RunStage, error: AnyError) -> AnyError {
        let error = error.context(stage.to_string());
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return error;
        }

        tracing::error!(
            run_id = self.inner.run_id,
            %stage,
            error = %format!("{error:#}"),
            "fatal dispatch error; halting run"
        );

        let shared = Arc::new(error);
        *self.slot() = Some(CapturedFailure {
            stage,
            error: shared.clone(),
        });
        self.inner.run_shutdown.cancel();

        SharedError(shared).into()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> Option<RunStage> {
        self.slot().as_ref().map(|failure| failure.stage)
    }

    pub fn error(&self) -> Option<AnyError> {
        self.slot()
            .as_ref()
            .map(|failure| SharedError(failure.error.clone()).into())
    }

    fn slot(&self) -> MutexGuard<'_, Option<CapturedFailure>> {
        self.inner
            .captured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for FatalErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalErrorHandler")
            .field("run_id", &self.inner.run_id)
            .field("stage", &self.stage())
            .finish()
    }
}
