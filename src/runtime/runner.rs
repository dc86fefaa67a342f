use crate::runtime::error::SourceError;
use crate::runtime::source::LedgerSource;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`LedgerSource`] and handles OS signals for graceful shutdowns.
pub struct Runner<S: LedgerSource> {
    source: S,
    shutdown: CancellationToken,
}

impl<S: LedgerSource> Runner<S> {
    /// Creates a new runner with a root [`CancellationToken`] that propagates
    /// through the entire pipeline (retriever, workers, queue, stages).
    pub fn new(source: S) -> Self {
        Self {
            source,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Runs the source to completion. Cancellation through the root token is
    /// reported as [`SourceError::Cancelled`].
    pub async fn run(&self) -> Result<(), SourceError> {
        self.source.start(self.shutdown.clone()).await
    }

    /// Stops the active run by cancelling the root token and delegating to the source.
    pub fn stop(&mut self) -> Result<(), SourceError> {
        self.shutdown.cancel();
        let result = self.source.stop();
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until the source finishes, a Ctrl-C (SIGINT) is received, or the
    /// shutdown token is cancelled elsewhere. A signal-driven stop is not an error.
    pub async fn run_until_ctrl_c(&mut self) -> Result<(), SourceError> {
        tracing::info!(
            source = self.source.name(),
            version = self.source.version(),
            "runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown"
        );

        let result = {
            let run = self.source.start(self.shutdown.clone());
            tokio::pin!(run);

            tokio::select! {
                result = &mut run => result,
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; shutting down runner");
                    self.shutdown.cancel();
                    run.await
                }
            }
        };

        self.reinitialize_shutdown_token();
        match result {
            Err(SourceError::Cancelled) => {
                tracing::info!("runner shutdown complete");
                Ok(())
            }
            other => other,
        }
    }

    fn reinitialize_shutdown_token(&mut self) {
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }
    }
}
