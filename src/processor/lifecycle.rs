//! Lifecycle orchestration for `BufferedRetriever`.

use super::worker_pool::{WorkerPool, WorkerPoolParams};
use crate::buffer::ordered_queue::OrderedLedgerQueue;
use crate::runtime::fatal::{FatalError, FatalErrorHandler};
use crate::runtime::telemetry::{self, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run-scoped background tasks: the fetch workers and the liveness reporter,
/// all tied to one child cancellation token.
///
/// Dropping the handles without calling [`LifecycleHandles::shutdown`] still
/// cancels the token, so the detached tasks exit on their own.
pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    fatal_handler: FatalErrorHandler,
    pool: Option<WorkerPool>,
    liveness_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<OrderedLedgerQueue>,
    pub liveness_interval: Duration,
    pub pool: WorkerPoolParams,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            liveness_interval,
            pool,
        } = params;

        let run_token = shutdown_root.child_token();
        let fatal_handler = FatalErrorHandler::new(run_token.clone());
        let liveness_handle = telemetry::spawn_liveness_reporter(
            telemetry,
            queue,
            run_token.clone(),
            liveness_interval,
        );
        let pool = WorkerPool::launch(pool, &run_token, &fatal_handler);

        Self {
            run_token,
            fatal_handler,
            pool: Some(pool),
            liveness_handle: Some(liveness_handle),
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::size)
    }

    pub(crate) fn take_error(&self) -> Option<FatalError> {
        self.fatal_handler.take_error()
    }

    /// Cancels every run-scoped task and waits for it to exit.
    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();

        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }

        if let Some(handle) = self.liveness_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "liveness reporter task panicked");
            }
        }
    }
}

impl Drop for LifecycleHandles {
    fn drop(&mut self) {
        self.run_token.cancel();
    }
}
