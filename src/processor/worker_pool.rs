//! Worker pool orchestration for `BufferedRetriever`.
//!
//! This module owns worker creation, pool sizing, and routing of worker
//! failures and panics to the run's fatal-error handler.

use crate::buffer::ordered_queue::OrderedLedgerQueue;
use crate::buffer::worker::{Worker, WorkerShared, WorkerSharedParams};
use crate::processor::range::LedgerRange;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use crate::store::client::LedgerStore;
use crate::store::schema::DataStoreSchema;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct WorkerPoolParams {
    pub num_workers: usize,
    pub store: Arc<dyn LedgerStore>,
    pub queue: Arc<OrderedLedgerQueue>,
    pub telemetry: Arc<Telemetry>,
    pub schema: DataStoreSchema,
    pub range: LedgerRange,
    pub retry_limit: u32,
    pub retry_wait: Duration,
}

pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Number of workers worth spawning: never more than the bounded range has
    /// files, and at least one.
    pub(crate) fn pool_size(requested: usize, schema: &DataStoreSchema, range: &LedgerRange) -> usize {
        let requested = requested.max(1);
        match range.end() {
            Some(end) => {
                let files = schema.files_between(range.start(), end);
                requested.min(usize::try_from(files).unwrap_or(usize::MAX)).max(1)
            }
            None => requested,
        }
    }

    pub(crate) fn launch(
        params: WorkerPoolParams,
        run_token: &CancellationToken,
        fatal_handler: &FatalErrorHandler,
    ) -> Self {
        let WorkerPoolParams {
            num_workers,
            store,
            queue,
            telemetry,
            schema,
            range,
            retry_limit,
            retry_wait,
        } = params;

        let size = Self::pool_size(num_workers, &schema, &range);
        let shared = WorkerShared::new(WorkerSharedParams {
            store,
            queue,
            telemetry,
            schema,
            range,
            retry_limit,
            retry_wait,
        });

        tracing::debug!(workers = size, range = %range, "launching fetch workers");

        let workers = (0..size)
            .map(|worker_id| {
                let worker = Worker::new(worker_id, size, run_token.clone(), shared.clone());
                let fatal_handler = fatal_handler.clone();

                tokio::spawn(async move {
                    let result = std::panic::AssertUnwindSafe(worker.run())
                        .catch_unwind()
                        .await;

                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => fatal_handler.trigger_fetch(err),
                        Err(panic_payload) => {
                            let panic_msg = panic_message(panic_payload.as_ref());
                            tracing::error!(
                                worker = worker_id,
                                panic = %panic_msg,
                                "worker task panicked"
                            );
                            let context = format!("worker {worker_id} panicked");
                            let panic_error =
                                anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}");
                            fatal_handler.trigger_external(context.as_str(), panic_error);
                        }
                    }
                })
            })
            .collect();

        Self { workers }
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit. Callers cancel the run token first.
    pub(crate) async fn join(self) {
        for (worker_id, result) in join_all(self.workers).await.into_iter().enumerate() {
            if let Err(err) = result {
                tracing::warn!(worker = worker_id, error = %err, "worker task failed to join");
            }
        }
    }
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
