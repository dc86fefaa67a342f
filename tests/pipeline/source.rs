use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    assert_is_contiguous, assert_timestamps_monotonic, config_map, event_log, events,
    init_tracing, invocations, memory_source, wait_for_events, RecordingStage,
};
use anyhow::Result;
use ledgerstream::{ConfigError, LedgerSource, MemoryLedgerStore, SourceError, StoreParams};
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn bounded_config(start: u32, end: u32) -> serde_json::Value {
    json!({
        "start_ledger": start,
        "end_ledger": end,
        "bucket_name": "b",
        "network": "testnet",
        "retry_wait": 1,
    })
}

#[tokio::test(start_paused = true)]
async fn two_stages_see_each_ledger_in_order() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(bounded_config(100, 102)))?;
    source.register(RecordingStage::new("P1", &log).boxed());
    source.register(RecordingStage::new("P2", &log).boxed());

    source.start(CancellationToken::new()).await?;

    let expected: Vec<(String, u32)> = [100, 101, 102]
        .into_iter()
        .flat_map(|sequence| [("P1".to_owned(), sequence), ("P2".to_owned(), sequence)])
        .collect();
    assert_eq!(invocations(&log), expected);

    let recorded = events(&log);
    assert_timestamps_monotonic(&recorded);
    for pair in recorded.chunks(2) {
        assert_eq!(pair[0].timestamp, pair[1].timestamp, "stages share one message");
        assert_eq!((pair[0].index, pair[1].index), (0, 1));
    }

    let summary = source.last_run().expect("run summary is recorded");
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.last_sequence, Some(102));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_stages_still_count_every_ledger() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));

    let mut source = memory_source(&store);
    source.initialize(&config_map(bounded_config(100, 105)))?;
    assert_eq!(source.stage_count(), 0);

    source.start(CancellationToken::new()).await?;

    let summary = source.last_run().expect("run summary is recorded");
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.last_sequence, Some(105));
    Ok(())
}

#[tokio::test]
async fn missing_bucket_name_fails_initialize() {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::new());
    let mut source = memory_source(&store);

    let err = source
        .initialize(&config_map(json!({
            "start_ledger": 100,
            "end_ledger": 105,
            "network": "testnet",
        })))
        .unwrap_err();

    assert_eq!(err, ConfigError::Missing("bucket_name"));
    assert!(source.config().is_none());
    assert!(matches!(
        source.start(CancellationToken::new()).await,
        Err(SourceError::NotInitialized)
    ));
    assert_eq!(store.total_fetches(), 0);
}

#[tokio::test]
async fn inverted_range_fails_initialize() {
    let store = Arc::new(MemoryLedgerStore::new());
    let mut source = memory_source(&store);

    let err = source
        .initialize(&config_map(bounded_config(105, 100)))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Range(_)));
}

#[tokio::test(start_paused = true)]
async fn stage_failure_halts_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(bounded_config(100, 110)))?;
    source.register(RecordingStage::new("first", &log).boxed());
    source.register(RecordingStage::new("second", &log).failing_at(101).boxed());
    source.register(RecordingStage::new("third", &log).boxed());

    let err = source
        .start(CancellationToken::new())
        .await
        .expect_err("stage failure is fatal");

    match err {
        SourceError::Stage(stage) => {
            assert_eq!(stage.index(), 1);
            assert_eq!(stage.name(), "second");
            assert_eq!(stage.sequence(), 101);
        }
        other => panic!("expected stage error, got {other:?}"),
    }

    let calls = invocations(&log);
    assert_eq!(
        calls,
        vec![
            ("first".to_owned(), 100),
            ("second".to_owned(), 100),
            ("third".to_owned(), 100),
            ("first".to_owned(), 101),
            ("second".to_owned(), 101),
        ]
    );

    let summary = source.last_run().expect("summary survives failures");
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.last_sequence, Some(100));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_failures_are_invisible() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=191));
    store.fail_next(64, 2);
    store.fail_next(128, 3);
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 100,
        "end_ledger": 150,
        "bucket_name": "b",
        "network": "testnet",
        "retry_limit": 3,
        "retry_wait": 1,
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    source.start(CancellationToken::new()).await?;

    let sequences: Vec<u32> = events(&log).iter().map(|event| event.sequence).collect();
    assert_eq!(sequences.first(), Some(&100));
    assert_eq!(sequences.last(), Some(&150));
    assert_is_contiguous(&sequences);
    assert_eq!(store.attempts(64), 3);
    assert_eq!(store.attempts(128), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_fetch_retries_abort_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=191));
    store.fail_next(128, 100);
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 100,
        "end_ledger": 150,
        "bucket_name": "b",
        "network": "testnet",
        "retry_limit": 2,
        "retry_wait": 1,
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    let err = source
        .start(CancellationToken::new())
        .await
        .expect_err("retries are exhausted");

    match err {
        SourceError::Fetch(fetch) => {
            assert_eq!(fetch.attempts(), 3);
            assert_eq!(fetch.file().start, 128);
            assert_eq!(fetch.file().key, "FFFFFFFF--0-639/FFFFFF7F--128-191.xdr.zstd");
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(store.attempts(128), 3);
    assert!(events(&log).iter().all(|event| event.sequence < 128));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unbounded_run_follows_the_store_until_stopped() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 120,
        "bucket_name": "b",
        "network": "testnet",
        "retry_wait": 1,
    })))?;
    source.register(RecordingStage::new("sink", &log).boxed());
    let source = Arc::new(source);

    let handle = tokio::spawn({
        let source = source.clone();
        async move { source.start(CancellationToken::new()).await }
    });

    wait_for_events(&log, 8, Duration::from_secs(30)).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(log.lock().unwrap().len(), 8, "nothing past the published tip");
    assert!(source.is_running());

    store.publish_range(128..=191);
    wait_for_events(&log, 72, Duration::from_secs(30)).await?;

    source.stop()?;
    source.stop()?;
    let outcome = timeout(Duration::from_secs(5), handle)
        .await
        .expect("run stops within one poll interval")
        .expect("run task should not panic");
    assert!(matches!(outcome, Err(SourceError::Cancelled)));
    assert!(!source.is_running());
    source.stop()?;

    let sequences: Vec<u32> = events(&log).iter().map(|event| event.sequence).collect();
    assert_eq!(sequences.first(), Some(&120));
    assert_is_contiguous(&sequences);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn host_cancellation_stops_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=63));
    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 10,
        "bucket_name": "b",
        "network": "testnet",
    })))?;

    let host = CancellationToken::new();
    let canceller = {
        let host = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            host.cancel();
        })
    };

    let outcome = source.start(host).await;
    assert!(matches!(outcome, Err(SourceError::Cancelled)));
    canceller.await?;

    let summary = source.last_run().expect("summary is logged on cancellation");
    assert_eq!(summary.processed, 54);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_start_is_rejected() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=63));
    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 0,
        "bucket_name": "b",
        "network": "testnet",
    })))?;
    let source = Arc::new(source);

    let token = CancellationToken::new();
    let first = tokio::spawn({
        let source = source.clone();
        let token = token.clone();
        async move { source.start(token).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = source.start(CancellationToken::new()).await;
    assert!(matches!(second, Err(SourceError::AlreadyRunning)));

    token.cancel();
    assert!(matches!(first.await?, Err(SourceError::Cancelled)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn source_can_run_again_after_completion() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=127));
    let log = event_log();

    let mut source = memory_source(&store);
    source.initialize(&config_map(bounded_config(60, 70)))?;
    source.register(RecordingStage::new("sink", &log).boxed());

    source.start(CancellationToken::new()).await?;
    source.start(CancellationToken::new()).await?;

    let sequences: Vec<u32> = events(&log).iter().map(|event| event.sequence).collect();
    let once: Vec<u32> = (60..=70).collect();
    assert_eq!(sequences, [once.clone(), once].concat());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abandoned_start_future_releases_the_run() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::with_range(0..=63));
    let mut source = memory_source(&store);
    source.initialize(&config_map(json!({
        "start_ledger": 0,
        "bucket_name": "b",
        "network": "testnet",
        "retry_wait": 1,
    })))?;

    let outcome = timeout(Duration::from_secs(3), source.start(CancellationToken::new())).await;
    assert!(outcome.is_err(), "unbounded run never completes on its own");
    assert!(!source.is_running());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let fetches_after_drop = store.total_fetches();
    assert!(fetches_after_drop > 0);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        store.total_fetches(),
        fetches_after_drop,
        "workers of an abandoned run must stop polling the store"
    );

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        source.start(cancelled).await,
        Err(SourceError::Cancelled)
    ));
    Ok(())
}

#[tokio::test]
async fn connector_failure_is_a_store_error() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryLedgerStore::for_params(StoreParams {
        network: "pubnet".to_owned(),
        bucket_name: "b".to_owned(),
    }));
    store.publish_range(0..=63);
    let mut source = memory_source(&store);
    source.initialize(&config_map(bounded_config(10, 20)))?;

    let err = source
        .start(CancellationToken::new())
        .await
        .expect_err("store for another network is refused");
    assert!(matches!(err, SourceError::Store(_)));
    assert!(!source.is_running());
    assert_eq!(store.total_fetches(), 0);
    Ok(())
}
