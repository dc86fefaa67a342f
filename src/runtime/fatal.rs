use crate::runtime::error::SourceError;
use crate::store::client::FetchError;
use anyhow::Error as AnyError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// First fatal failure raised by a background worker during a run.
#[derive(Debug)]
pub(crate) enum FatalError {
    Fetch(FetchError),
    Internal(AnyError),
}

impl FatalError {
    pub(crate) fn into_source_error(self) -> SourceError {
        match self {
            FatalError::Fetch(err) => SourceError::Fetch(err),
            FatalError::Internal(err) => SourceError::Internal(err),
        }
    }
}

/// Captures the first fatal worker error and cancels the run so the dispatch
/// loop can unwind and report it.
#[derive(Clone)]
pub(crate) struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<FatalError>>,
}

impl FatalErrorHandler {
    pub(crate) fn new(run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured_error: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn trigger_fetch(&self, error: FetchError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %error, "suppressing fetch error raised after shutdown began");
            return;
        }

        tracing::error!(
            file = %error.file(),
            attempts = error.attempts(),
            error = %error,
            "ledger file fetch exhausted retries; aborting run"
        );
        self.capture(FatalError::Fetch(error));
    }

    pub(crate) fn trigger_external(&self, context: &str, error: AnyError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal pipeline error; initiating shutdown"
        );
        self.capture(FatalError::Internal(error));
    }

    fn capture(&self, error: FatalError) {
        {
            let mut slot = self
                .inner
                .captured_error
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.inner.run_shutdown.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Removes the captured error, if any.
    pub(crate) fn take_error(&self) -> Option<FatalError> {
        self.inner
            .captured_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
