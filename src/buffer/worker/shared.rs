use crate::buffer::ordered_queue::OrderedLedgerQueue;
use crate::processor::range::LedgerRange;
use crate::runtime::telemetry::Telemetry;
use crate::store::client::LedgerStore;
use crate::store::schema::DataStoreSchema;
use std::sync::Arc;
use std::time::Duration;

/// Handles and settings every worker of a run shares.
#[derive(Clone)]
pub struct WorkerShared {
    pub(super) store: Arc<dyn LedgerStore>,
    pub(super) queue: Arc<OrderedLedgerQueue>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) schema: DataStoreSchema,
    pub(super) range: LedgerRange,
    pub(super) retry_limit: u32,
    pub(super) retry_wait: Duration,
}

pub struct WorkerSharedParams {
    pub store: Arc<dyn LedgerStore>,
    pub queue: Arc<OrderedLedgerQueue>,
    pub telemetry: Arc<Telemetry>,
    pub schema: DataStoreSchema,
    pub range: LedgerRange,
    pub retry_limit: u32,
    pub retry_wait: Duration,
}

impl WorkerShared {
    pub fn new(params: WorkerSharedParams) -> Self {
        Self {
            store: params.store,
            queue: params.queue,
            telemetry: params.telemetry,
            schema: params.schema,
            range: params.range,
            retry_limit: params.retry_limit,
            retry_wait: params.retry_wait,
        }
    }
}
