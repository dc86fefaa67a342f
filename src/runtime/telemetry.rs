use crate::buffer::ordered_queue::OrderedLedgerQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default period of the liveness heartbeat.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

const NO_SEQUENCE: u64 = u64::MAX;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Run-scoped counters shared between the dispatch loop, the fetch workers and
/// the liveness reporter.
#[derive(Debug)]
pub struct Telemetry {
    processed_ledgers: AtomicU64,
    last_sequence: AtomicU64,
    files_fetched: AtomicU64,
    fetch_retries: AtomicU64,
    fetch_failures: AtomicU64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            processed_ledgers: AtomicU64::new(0),
            last_sequence: AtomicU64::new(NO_SEQUENCE),
            files_fetched: AtomicU64::new(0),
            fetch_retries: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
        }
    }
}

impl Telemetry {
    /// Records a ledger that made it through every stage.
    pub fn record_processed(&self, sequence: u32) {
        self.processed_ledgers.fetch_add(1, Ordering::Relaxed);
        self.last_sequence
            .store(u64::from(sequence), Ordering::Relaxed);
    }

    pub fn record_file_fetched(&self) {
        self.files_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_ledgers(&self) -> u64 {
        self.processed_ledgers.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> Option<u32> {
        match self.last_sequence.load(Ordering::Relaxed) {
            NO_SEQUENCE => None,
            value => u32::try_from(value).ok(),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            processed_ledgers: self.processed_ledgers(),
            last_sequence: self.last_sequence(),
            files_fetched: self.files_fetched.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub processed_ledgers: u64,
    pub last_sequence: Option<u32>,
    pub files_fetched: u64,
    pub fetch_retries: u64,
    pub fetch_failures: u64,
}

/// Shortest heartbeat period accepted; smaller values are raised to it.
pub const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(1);

/// Spawns the heartbeat task. It logs cumulative progress on a fixed period,
/// whether or not ledgers are flowing, until `shutdown` fires.
pub fn spawn_liveness_reporter(
    telemetry: Arc<Telemetry>,
    queue: Arc<OrderedLedgerQueue>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_LIVENESS_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "ledgerstream::metrics", "liveness reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    let buffered = queue.len().await;

                    tracing::info!(
                        target: "ledgerstream::metrics",
                        processed = snapshot.processed_ledgers,
                        last_sequence = ?snapshot.last_sequence,
                        buffered,
                        files_fetched = snapshot.files_fetched,
                        fetch_retries = snapshot.fetch_retries,
                        fetch_failures = snapshot.fetch_failures,
                        "pipeline alive"
                    );
                }
            }
        }
    })
}
