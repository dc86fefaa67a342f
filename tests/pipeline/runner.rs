use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    assert_is_contiguous, config_map, event_log, events, init_tracing, memory_source,
    wait_for_events, RecordingStage,
};
use anyhow::{Context, Result};
use ledgerstream::{LedgerSource, MemoryLedgerStore, Runner, SourceError};
use serde_json::json;
use tokio::time::{sleep, timeout};

#[tokio::test(start_paused = true)]
async fn runner_returns_when_bounded_range_completes() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=255));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 10,
        "end_ledger": 200,
        "bucket_name": "b",
        "network": "testnet",
        "num_workers": 3,
        "buffer_size": 16,
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    let mut runner = Runner::new(source);
    timeout(Duration::from_secs(60), runner.run_until_ctrl_c())
        .await
        .context("runner should finish once the range is exhausted")??;

    let sequences: Vec<u32> = events(&log).iter().map(|event| event.sequence).collect();
    assert_eq!(sequences.len(), 191);
    assert_is_contiguous(&sequences);
    assert_eq!(runner.source().last_run().map(|run| run.processed), Some(191));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn runner_exits_on_stage_failure() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 0,
        "bucket_name": "b",
        "network": "testnet",
    })))?;
    source.register(RecordingStage::new("sink", &log).failing_at(42).boxed());

    let mut runner = Runner::new(source);
    let outcome = timeout(Duration::from_secs(60), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after a stage failure")?;

    let err = outcome.expect_err("stage failure should abort runner");
    assert!(matches!(err, SourceError::Stage(_)));
    assert!(
        err.to_string().contains("failed on ledger 42"),
        "runner did not propagate stage failure, got {err}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn runner_cancellation_is_a_clean_shutdown() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=63));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 0,
        "bucket_name": "b",
        "network": "testnet",
        "retry_wait": 1,
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    let mut runner = Runner::new(source);
    let token = runner.cancellation_token();
    let canceller = tokio::spawn({
        let log = log.clone();
        async move {
            wait_for_events(&log, 64, Duration::from_secs(30)).await?;
            sleep(Duration::from_secs(3)).await;
            token.cancel();
            anyhow::Ok(())
        }
    });

    timeout(Duration::from_secs(60), runner.run_until_ctrl_c())
        .await
        .context("runner should observe cancellation")??;
    canceller.await??;

    assert!(!runner.source().is_running());
    assert_eq!(events(&log).len(), 64);
    assert!(
        !runner.cancellation_token().is_cancelled(),
        "runner re-arms its shutdown token after a run"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn runner_can_restart_after_stop() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 64,
        "end_ledger": 127,
        "bucket_name": "b",
        "network": "testnet",
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    let mut runner = Runner::new(source);
    runner.stop()?;
    runner.run().await?;
    runner.stop()?;
    runner.run().await?;

    let sequences: Vec<u32> = events(&log).iter().map(|event| event.sequence).collect();
    let once: Vec<u32> = (64..=127).collect();
    assert_eq!(sequences, [once.clone(), once].concat());

    let source = runner.into_source();
    assert_eq!(source.last_run().map(|run| run.processed), Some(64));
    assert_eq!(source.name(), "buffered-storage-source");
    Ok(())
}
