use crate::buffer::ordered_queue::OrderedLedgerQueue;
use crate::buffer::record::LedgerRecord;
use crate::processor::range::LedgerRange;
use crate::runtime::telemetry::Telemetry;
use crate::store::client::{FetchError, LedgerStore};
use crate::store::schema::{DataStoreSchema, LedgerFile};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::shared::WorkerShared;
use super::types::{worker_stride, DeliveryOutcome, FileOutcome};

/// Prefetches every `stride`-th file of the range, starting at file `id`, into
/// the ordered queue.
pub struct Worker {
    pub id: usize,
    pub(super) stride: u64,
    pub(super) store: Arc<dyn LedgerStore>,
    pub(super) queue: Arc<OrderedLedgerQueue>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) schema: DataStoreSchema,
    pub(super) range: LedgerRange,
    pub(super) retry_limit: u32,
    pub(super) retry_wait: Duration,
    pub(super) shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        worker_count: usize,
        shutdown: CancellationToken,
        shared: WorkerShared,
    ) -> Self {
        let WorkerShared {
            store,
            queue,
            telemetry,
            schema,
            range,
            retry_limit,
            retry_wait,
        } = shared;

        Self {
            id,
            stride: worker_stride(worker_count),
            store,
            queue,
            telemetry,
            schema,
            range,
            retry_limit,
            retry_wait,
            shutdown,
        }
    }

    /// Start sequences of the files this worker handles, in fetch order.
    #[must_use]
    pub fn assigned_files(&self, limit: usize) -> Vec<u32> {
        (0..limit as u64)
            .map_while(|step| {
                let index = (self.id as u64).checked_add(step.checked_mul(self.stride)?)?;
                self.file_start(index)
            })
            .collect()
    }

    /// Runs until the range is exhausted, the run is cancelled, or a file
    /// fetch runs out of retries.
    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(self) -> Result<(), FetchError> {
        tracing::debug!(worker = self.id, stride = self.stride, "worker task started");

        let mut index = self.id as u64;
        loop {
            if self.shutdown.is_cancelled() {
                tracing::debug!(worker = self.id, "shutdown requested; exiting worker loop");
                break;
            }

            let Some(file_start) = self.file_start(index) else {
                tracing::debug!(worker = self.id, "no files left in range");
                break;
            };
            let file = self.schema.file_for(file_start);

            let records = match self.fetch_file(&file).await? {
                FileOutcome::Ready(records) => records,
                FileOutcome::Cancelled => break,
            };

            match self.deliver(&file, records).await {
                DeliveryOutcome::Delivered(count) => {
                    tracing::trace!(worker = self.id, file = %file, records = count, "file buffered");
                }
                DeliveryOutcome::Cancelled => break,
            }

            index = match index.checked_add(self.stride) {
                Some(next) => next,
                None => break,
            };
        }

        tracing::debug!(worker = self.id, "worker task exited");
        Ok(())
    }

    /// Start of the `index`-th file of the range, or `None` past its end.
    fn file_start(&self, index: u64) -> Option<u32> {
        let start = self.schema.nth_file_start(self.range.start(), index)?;
        match self.range.end() {
            Some(end) if start > end => None,
            _ => Some(start),
        }
    }

    /// Pushes the in-range records of a file into the queue, waiting on
    /// capacity as needed.
    pub(super) async fn deliver(
        &self,
        file: &LedgerFile,
        records: Vec<LedgerRecord>,
    ) -> DeliveryOutcome {
        let mut delivered = 0usize;
        for record in records
            .into_iter()
            .filter(|record| self.range.contains(record.sequence()))
        {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(worker = self.id, file = %file, "cancelled while buffering file");
                    return DeliveryOutcome::Cancelled;
                }
                _ = self.queue.push(record) => delivered += 1,
            }
        }
        DeliveryOutcome::Delivered(delivered)
    }
}
