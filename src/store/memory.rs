//! In-process [`LedgerStore`] used by tests and local replays.
//!
//! A file is only visible once every sequence it spans has been published,
//! mirroring how an exporter uploads complete objects.

use crate::buffer::record::LedgerRecord;
use crate::store::client::{LedgerStore, LedgerStoreConnector, StoreParams};
use crate::store::schema::LedgerFile;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    params: Option<StoreParams>,
    records: RwLock<BTreeMap<u32, Bytes>>,
    failures: Mutex<HashMap<u32, usize>>,
    delays: Mutex<HashMap<u32, Duration>>,
    attempts: Mutex<HashMap<u32, usize>>,
    total_fetches: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose [`connector`](Self::connector) only accepts the
    /// given network and bucket.
    pub fn for_params(params: StoreParams) -> Self {
        Self {
            params: Some(params),
            ..Self::default()
        }
    }

    /// Creates a store pre-populated with synthetic records for `range`.
    pub fn with_range(range: RangeInclusive<u32>) -> Self {
        let store = Self::new();
        store.publish_range(range);
        store
    }

    pub fn params(&self) -> Option<&StoreParams> {
        self.params.as_ref()
    }

    /// Connector handing out this store. Parameters other than the ones given
    /// to [`for_params`](Self::for_params) are refused.
    pub fn connector(self: &Arc<Self>) -> impl LedgerStoreConnector {
        let store = Arc::clone(self);
        move |params: &StoreParams| -> Result<Arc<dyn LedgerStore>> {
            store.check_params(params)?;
            Ok(store.clone())
        }
    }

    fn check_params(&self, params: &StoreParams) -> Result<()> {
        match &self.params {
            Some(expected) if expected != params => Err(anyhow!(
                "no ledger store for network {} bucket {}; serving network {} bucket {}",
                params.network,
                params.bucket_name,
                expected.network,
                expected.bucket_name
            )),
            _ => Ok(()),
        }
    }

    pub fn publish(&self, records: impl IntoIterator<Item = LedgerRecord>) {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in records {
            guard.insert(record.sequence(), record.into_content());
        }
    }

    /// Publishes synthetic records whose content is the big-endian sequence.
    pub fn publish_range(&self, range: RangeInclusive<u32>) {
        self.publish(range.map(|sequence| {
            LedgerRecord::new(sequence, Bytes::copy_from_slice(&sequence.to_be_bytes()))
        }));
    }

    pub fn remove(&self, sequence: u32) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sequence);
    }

    /// Makes the next `count` fetches of the file starting at `file_start` fail.
    pub fn fail_next(&self, file_start: u32, count: usize) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_start, count);
    }

    /// Delays every fetch of the file starting at `file_start`.
    pub fn delay_file(&self, file_start: u32, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_start, delay);
    }

    /// Number of fetch attempts made against the file starting at `file_start`.
    pub fn attempts(&self, file_start: u32) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&file_start)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.total_fetches.load(Ordering::SeqCst)
    }

    fn take_failure(&self, file_start: u32) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get_mut(&file_start) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn read_file(&self, file: &LedgerFile) -> Option<Vec<LedgerRecord>> {
        let guard = self.records.read().unwrap_or_else(|e| e.into_inner());
        (file.start..=file.end)
            .map(|sequence| {
                guard
                    .get(&sequence)
                    .map(|content| LedgerRecord::new(sequence, content.clone()))
            })
            .collect()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn get_file<'a>(
        &'a self,
        file: &'a LedgerFile,
    ) -> BoxFuture<'a, Result<Option<Vec<LedgerRecord>>>> {
        Box::pin(async move {
            self.total_fetches.fetch_add(1, Ordering::SeqCst);
            *self
                .attempts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(file.start)
                .or_insert(0) += 1;

            let delay = self
                .delays
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&file.start)
                .copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.take_failure(file.start) {
                return Err(anyhow!("injected failure reading {}", file.key));
            }

            Ok(self.read_file(file))
        })
    }
}
