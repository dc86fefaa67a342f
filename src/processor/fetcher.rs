//! Buffered ledger retrieval.
//!
//! `BufferedRetriever` composes smaller modules so each concern is owned by the
//! component that knows it best:
//! - `worker_pool` sizes the pool and routes worker failures.
//! - `buffer::worker` fetches, retries, polls and validates individual files.
//! - `buffer::ordered_queue` turns out-of-order file completion into in-order
//!   delivery with backpressure.
//! - `lifecycle` wires run-scoped cancellation, the liveness reporter, and fatal
//!   error propagation.
//!
//! The struct below drains the queue into a [`LedgerConsumer`] one record at a
//! time, strictly in sequence order.

use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::range::LedgerRange;
use super::worker_pool::WorkerPoolParams;
use crate::buffer::ordered_queue::OrderedLedgerQueue;
use crate::buffer::record::LedgerRecord;
use crate::runtime::config::SourceConfig;
use crate::runtime::error::SourceError;
use crate::runtime::fatal::FatalError;
use crate::runtime::telemetry::{
    Telemetry, DEFAULT_LIVENESS_INTERVAL, MIN_LIVENESS_INTERVAL,
};
use crate::store::client::LedgerStore;
use crate::store::schema::DataStoreSchema;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ConsumeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SourceError>> + Send + 'a>>;

/// Receives records in strictly increasing sequence order. Any error aborts
/// the retrieval and is returned unchanged.
pub trait LedgerConsumer: Send {
    fn consume<'a>(&'a mut self, record: LedgerRecord) -> ConsumeFuture<'a>;
}

impl<F> LedgerConsumer for F
where
    F: FnMut(LedgerRecord) -> Result<(), SourceError> + Send,
{
    fn consume<'a>(&'a mut self, record: LedgerRecord) -> ConsumeFuture<'a> {
        let result = self(record);
        Box::pin(async move { result })
    }
}

/// Tuning for a single retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverOptions {
    pub buffer_size: usize,
    pub num_workers: usize,
    pub retry_limit: u32,
    pub retry_wait: Duration,
    pub schema: DataStoreSchema,
    pub liveness_interval: Duration,
}

impl RetrieverOptions {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            buffer_size: config.buffer_size() as usize,
            num_workers: config.num_workers() as usize,
            retry_limit: config.retry_limit(),
            retry_wait: config.retry_wait(),
            schema: config.schema(),
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval.max(MIN_LIVENESS_INTERVAL);
        self
    }
}

pub struct BufferedRetriever {
    store: Arc<dyn LedgerStore>,
    options: RetrieverOptions,
    telemetry: Arc<Telemetry>,
}

impl BufferedRetriever {
    pub fn new(store: Arc<dyn LedgerStore>, options: RetrieverOptions) -> Self {
        Self {
            store,
            options,
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn options(&self) -> &RetrieverOptions {
        &self.options
    }

    /// Returns a clone of the telemetry handle shared with workers and the
    /// liveness reporter.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Streams every record of `range` into `consumer`.
    ///
    /// A bounded range returns `Ok(())` once its last record was consumed; an
    /// unbounded one only ends through `shutdown` or an error. Background tasks
    /// are always joined before returning.
    pub async fn apply<C>(
        &self,
        range: LedgerRange,
        shutdown: &CancellationToken,
        consumer: &mut C,
    ) -> Result<(), SourceError>
    where
        C: LedgerConsumer + ?Sized,
    {
        let buffer_size = self.options.buffer_size.max(1);
        let queue = Arc::new(OrderedLedgerQueue::new(range.start(), buffer_size));

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: shutdown,
            telemetry: self.telemetry.clone(),
            queue: queue.clone(),
            liveness_interval: self.options.liveness_interval,
            pool: WorkerPoolParams {
                num_workers: self.options.num_workers,
                store: self.store.clone(),
                queue: queue.clone(),
                telemetry: self.telemetry.clone(),
                schema: self.options.schema,
                range,
                retry_limit: self.options.retry_limit,
                retry_wait: self.options.retry_wait,
            },
        });

        tracing::info!(
            range = %range,
            workers = lifecycle.worker_count(),
            buffer_size,
            retry_limit = self.options.retry_limit,
            "retrieving ledgers"
        );

        let result = drain(range, &queue, &lifecycle, consumer).await;
        lifecycle.shutdown().await;
        result
    }
}

async fn drain<C>(
    range: LedgerRange,
    queue: &OrderedLedgerQueue,
    lifecycle: &LifecycleHandles,
    consumer: &mut C,
) -> Result<(), SourceError>
where
    C: LedgerConsumer + ?Sized,
{
    let token = &lifecycle.run_token;
    let mut expected = range.start();

    loop {
        let record = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(lifecycle
                    .take_error()
                    .map_or(SourceError::Cancelled, FatalError::into_source_error));
            }
            record = queue.pop_next() => record,
        };
        debug_assert_eq!(record.sequence(), expected);

        consumer.consume(record).await?;

        if range.end() == Some(expected) {
            return Ok(());
        }
        expected = match expected.checked_add(1) {
            Some(next) => next,
            None => return Ok(()),
        };
    }
}
