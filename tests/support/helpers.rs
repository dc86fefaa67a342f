use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use anyhow::{anyhow, bail, Result};
use ledgerstream::{
    BufferedStorageSource, ConfigMap, LedgerStage, MemoryLedgerStore, Message, StageContext,
    StageFuture,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// One stage invocation as observed by a [`RecordingStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    pub stage: String,
    pub index: usize,
    pub sequence: u32,
    pub timestamp: SystemTime,
}

pub type EventLog = Arc<Mutex<Vec<StageEvent>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<StageEvent> {
    log.lock().unwrap().clone()
}

/// `(stage, sequence)` pairs in invocation order.
pub fn invocations(log: &EventLog) -> Vec<(String, u32)> {
    events(log)
        .into_iter()
        .map(|event| (event.stage, event.sequence))
        .collect()
}

/// Appends every message it sees to a shared log and optionally fails on one
/// sequence.
pub struct RecordingStage {
    label: String,
    log: EventLog,
    fail_on: Option<u32>,
}

impl RecordingStage {
    pub fn new(label: &str, log: &EventLog) -> Self {
        Self {
            label: label.to_owned(),
            log: log.clone(),
            fail_on: None,
        }
    }

    pub fn failing_at(mut self, sequence: u32) -> Self {
        self.fail_on = Some(sequence);
        self
    }

    pub fn boxed(self) -> Box<dyn LedgerStage> {
        Box::new(self)
    }
}

impl LedgerStage for RecordingStage {
    fn name(&self) -> &str {
        &self.label
    }

    fn process<'a>(&'a mut self, ctx: &'a StageContext, message: &'a Message) -> StageFuture<'a> {
        Box::pin(async move {
            assert_eq!(ctx.sequence(), message.sequence());
            self.log.lock().unwrap().push(StageEvent {
                stage: self.label.clone(),
                index: ctx.index(),
                sequence: message.sequence(),
                timestamp: message.timestamp(),
            });
            if self.fail_on == Some(message.sequence()) {
                return Err(anyhow!("{} rejected ledger {}", self.label, message.sequence()));
            }
            Ok(())
        })
    }
}

pub fn config_map(value: Value) -> ConfigMap {
    value
        .as_object()
        .cloned()
        .expect("config fixture must be a JSON object")
}

/// A source whose connector always hands out `store`.
pub fn memory_source(store: &Arc<MemoryLedgerStore>) -> BufferedStorageSource {
    BufferedStorageSource::new(store.connector()).with_liveness_interval(Duration::from_secs(1))
}

pub async fn wait_for_events(log: &EventLog, target: usize, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = log.lock().unwrap().len();
        if current >= target {
            return Ok(());
        }

        if start.elapsed() > timeout {
            bail!("stages recorded {current} of {target} events within {timeout:?}");
        }

        sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_is_contiguous(sequences: &[u32]) {
    for window in sequences.windows(2) {
        if let [lhs, rhs] = window {
            assert_eq!(rhs, &(lhs + 1), "sequences must increase by exactly one");
        }
    }
}

pub fn assert_timestamps_monotonic(events: &[StageEvent]) {
    for window in events.windows(2) {
        if let [lhs, rhs] = window {
            assert!(
                rhs.timestamp >= lhs.timestamp,
                "timestamps must never decrease ({lhs:?} then {rhs:?})"
            );
        }
    }
}
