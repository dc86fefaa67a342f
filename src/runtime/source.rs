//! Host-facing adapter that ties configuration, retrieval, and the processor
//! chain together.

use crate::buffer::record::{LedgerRecord, Message};
use crate::processor::chain::ProcessorChain;
use crate::processor::fetcher::{BufferedRetriever, ConsumeFuture, LedgerConsumer, RetrieverOptions};
use crate::processor::range::LedgerRange;
use crate::runtime::config::{ConfigError, ConfigMap, SourceConfig};
use crate::runtime::error::SourceError;
use crate::runtime::progress::RateTracker;
use crate::runtime::stage::LedgerStage;
use crate::runtime::telemetry::{
    Telemetry, DEFAULT_LIVENESS_INTERVAL, MIN_LIVENESS_INTERVAL,
};
use crate::store::client::LedgerStoreConnector;
use core::future::Future;
use core::pin::Pin;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SourceError>> + Send + 'a>>;

/// Role a plugin plays in the host's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Source,
    Processor,
    Consumer,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Source => write!(f, "source"),
            PluginKind::Processor => write!(f, "processor"),
            PluginKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// Lifecycle a host drives a ledger source through: configure, register
/// stages, then run until the range ends or the host cancels.
pub trait LedgerSource: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn kind(&self) -> PluginKind {
        PluginKind::Source
    }

    /// Parses and validates the host configuration. No I/O happens here.
    fn initialize(&mut self, config: &ConfigMap) -> Result<(), ConfigError>;

    /// Appends a stage. Stages run in registration order.
    fn register(&mut self, stage: Box<dyn LedgerStage>);

    /// Runs the pipeline until the range is exhausted, `cancellation` fires,
    /// [`LedgerSource::stop`] is called, or a fatal error occurs.
    fn start(&self, cancellation: CancellationToken) -> SourceFuture<'_>;

    /// Cancels the active run, if any. Safe to call at any time.
    fn stop(&self) -> Result<(), SourceError>;

    fn close(&self) -> Result<(), SourceError> {
        self.stop()
    }
}

/// Outcome counters of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub processed: u64,
    pub last_sequence: Option<u32>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            0.0
        } else {
            self.processed as f64 / secs
        }
    }
}

/// Ledger source backed by a partitioned object store with buffered,
/// concurrent prefetching.
pub struct BufferedStorageSource {
    connector: Arc<dyn LedgerStoreConnector>,
    config: Option<SourceConfig>,
    chain: tokio::sync::Mutex<ProcessorChain>,
    active_run: Mutex<Option<CancellationToken>>,
    last_run: Mutex<Option<RunSummary>>,
    liveness_interval: Duration,
}

impl BufferedStorageSource {
    pub const NAME: &'static str = "buffered-storage-source";

    pub fn new(connector: impl LedgerStoreConnector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn LedgerStoreConnector>) -> Self {
        Self {
            connector,
            config: None,
            chain: tokio::sync::Mutex::new(ProcessorChain::new()),
            active_run: Mutex::new(None),
            last_run: Mutex::new(None),
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }

    /// Overrides the heartbeat period; mostly useful in tests.
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval.max(MIN_LIVENESS_INTERVAL);
        self
    }

    pub fn config(&self) -> Option<&SourceConfig> {
        self.config.as_ref()
    }

    /// Registers a stage under an explicit name instead of its type name.
    pub fn register_named(&mut self, name: impl Into<Arc<str>>, stage: Box<dyn LedgerStage>) {
        self.chain.get_mut().register_named(name, stage);
    }

    pub fn stage_count(&mut self) -> usize {
        self.chain.get_mut().len()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active_run).is_some()
    }

    /// Summary of the last finished run, whatever its outcome.
    pub fn last_run(&self) -> Option<RunSummary> {
        *lock(&self.last_run)
    }

    async fn run(
        &self,
        config: &SourceConfig,
        chain: &mut ProcessorChain,
        run_token: &CancellationToken,
    ) -> Result<(), SourceError> {
        let range = LedgerRange::from_config(config);
        let store = self
            .connector
            .connect(&config.store_params())
            .map_err(SourceError::Store)?;

        if chain.is_empty() {
            tracing::warn!("pipeline has no registered stages; ledgers will only be counted");
        }

        let retriever = BufferedRetriever::new(
            store,
            RetrieverOptions::from_config(config).with_liveness_interval(self.liveness_interval),
        );
        let telemetry = retriever.telemetry();

        tracing::info!(
            range = %range,
            bucket = config.bucket_name(),
            network = config.network(),
            stages = chain.len(),
            "starting ledger source"
        );

        let started = Instant::now();
        let mut consumer = ChainConsumer::new(chain, run_token, &telemetry);
        let result = retriever.apply(range, run_token, &mut consumer).await;

        let snapshot = telemetry.snapshot();
        let summary = RunSummary {
            processed: snapshot.processed_ledgers,
            last_sequence: snapshot.last_sequence,
            elapsed: started.elapsed(),
        };
        *lock(&self.last_run) = Some(summary);
        log_summary(&summary, &result);
        result
    }
}

impl LedgerSource for BufferedStorageSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn initialize(&mut self, config: &ConfigMap) -> Result<(), ConfigError> {
        match SourceConfig::from_map(config) {
            Ok(parsed) => {
                tracing::info!(
                    start_ledger = parsed.start_ledger(),
                    end_ledger = parsed.end_ledger(),
                    bucket = parsed.bucket_name(),
                    network = parsed.network(),
                    "ledger source initialized"
                );
                self.config = Some(parsed);
                Ok(())
            }
            Err(err) => {
                tracing::error!(key = err.key(), error = %err, "invalid ledger source configuration");
                Err(err)
            }
        }
    }

    fn register(&mut self, stage: Box<dyn LedgerStage>) {
        self.chain.get_mut().register(stage);
    }

    fn start(&self, cancellation: CancellationToken) -> SourceFuture<'_> {
        Box::pin(async move {
            let config = self.config.as_ref().ok_or(SourceError::NotInitialized)?;
            let mut chain = self
                .chain
                .try_lock()
                .map_err(|_| SourceError::AlreadyRunning)?;

            let run_token = cancellation.child_token();
            let _active = ActiveRun::enter(&self.active_run, &run_token);

            self.run(config, &mut chain, &run_token).await
        })
    }

    fn stop(&self) -> Result<(), SourceError> {
        if let Some(token) = lock(&self.active_run).as_ref() {
            if !token.is_cancelled() {
                tracing::info!("stopping ledger source");
                token.cancel();
            }
        }
        Ok(())
    }
}

/// Marks a run as active for as long as it lives. Dropping it, including when
/// the `start` future is abandoned mid-run, cancels the run and clears the slot.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    token: CancellationToken,
}

impl<'a> ActiveRun<'a> {
    fn enter(slot: &'a Mutex<Option<CancellationToken>>, token: &CancellationToken) -> Self {
        *lock(slot) = Some(token.clone());
        Self {
            slot,
            token: token.clone(),
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_summary(summary: &RunSummary, result: &Result<(), SourceError>) {
    let elapsed_ms = summary.elapsed.as_millis() as u64;
    let rate = format!("{:.2}", summary.rate());
    match result {
        Ok(()) => tracing::info!(
            processed = summary.processed,
            last_sequence = ?summary.last_sequence,
            elapsed_ms,
            rate,
            "ledger source finished"
        ),
        Err(SourceError::Cancelled) => tracing::info!(
            processed = summary.processed,
            last_sequence = ?summary.last_sequence,
            elapsed_ms,
            rate,
            "ledger source cancelled"
        ),
        Err(err) => tracing::error!(
            processed = summary.processed,
            last_sequence = ?summary.last_sequence,
            elapsed_ms,
            rate,
            error = %err,
            "ledger source failed"
        ),
    }
}

/// Feeds retrieved records through the chain and keeps the run's counters.
struct ChainConsumer<'a> {
    chain: &'a mut ProcessorChain,
    cancellation: &'a CancellationToken,
    telemetry: &'a Telemetry,
    rate: RateTracker,
    last_timestamp: Option<SystemTime>,
}

impl<'a> ChainConsumer<'a> {
    fn new(
        chain: &'a mut ProcessorChain,
        cancellation: &'a CancellationToken,
        telemetry: &'a Telemetry,
    ) -> Self {
        Self {
            chain,
            cancellation,
            telemetry,
            rate: RateTracker::new(),
            last_timestamp: None,
        }
    }

    /// Wall-clock time, clamped so it never goes backwards within a run.
    fn next_timestamp(&mut self) -> SystemTime {
        let now = SystemTime::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

impl LedgerConsumer for ChainConsumer<'_> {
    fn consume<'b>(&'b mut self, record: LedgerRecord) -> ConsumeFuture<'b> {
        Box::pin(async move {
            let sequence = record.sequence();
            let message = Message::new(record, self.next_timestamp());

            self.chain.dispatch(&message, self.cancellation).await?;

            self.telemetry.record_processed(sequence);
            self.rate.record(sequence);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::client::{LedgerStore, StoreParams};
    use crate::store::memory::MemoryLedgerStore;
    use serde_json::json;

    fn config_map(value: serde_json::Value) -> ConfigMap {
        value.as_object().cloned().expect("object literal")
    }

    fn memory_source(range: std::ops::RangeInclusive<u32>) -> BufferedStorageSource {
        let store = Arc::new(MemoryLedgerStore::with_range(range));
        BufferedStorageSource::new(move |_: &StoreParams| -> anyhow::Result<Arc<dyn LedgerStore>> {
            Ok(store.clone())
        })
    }

    #[test]
    fn identity_is_reported() {
        let source = memory_source(0..=0);
        assert_eq!(source.name(), "buffered-storage-source");
        assert_eq!(source.kind(), PluginKind::Source);
        assert_eq!(source.kind().to_string(), "source");
        assert!(!source.version().is_empty());
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let source = memory_source(0..=127);
        let err = source.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotInitialized));
        assert!(source.last_run().is_none());
    }

    #[tokio::test]
    async fn connector_failure_is_reported() {
        let mut source = BufferedStorageSource::new(
            |_: &StoreParams| -> anyhow::Result<Arc<dyn LedgerStore>> {
                Err(anyhow::anyhow!("bucket unreachable"))
            },
        );
        source
            .initialize(&config_map(json!({
                "start_ledger": 1,
                "end_ledger": 2,
                "bucket_name": "b",
                "network": "testnet",
            })))
            .unwrap();

        let err = source.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Store(_)));
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn stop_without_run_is_a_no_op() {
        let source = memory_source(0..=0);
        source.stop().unwrap();
        source.stop().unwrap();
        source.close().unwrap();
        assert!(!source.is_running());
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut chain = ProcessorChain::new();
        let token = CancellationToken::new();
        let telemetry = Telemetry::default();
        let mut consumer = ChainConsumer::new(&mut chain, &token, &telemetry);

        let future = SystemTime::now() + Duration::from_secs(3600);
        consumer.last_timestamp = Some(future);
        assert_eq!(consumer.next_timestamp(), future);
        assert!(consumer.next_timestamp() >= future);
    }
}
