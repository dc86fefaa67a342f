use std::time::Duration;
use tokio::time::Instant;

/// Minimum span between two throughput reports.
pub const RATE_WINDOW: Duration = Duration::from_secs(10);

/// Throughput computed at the close of a rate window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub processed_in_window: u64,
    pub elapsed: Duration,
    pub per_second: f64,
}

/// Tracks dispatch throughput over rolling windows.
///
/// Owned by the dispatch loop; never shared.
#[derive(Debug)]
pub struct RateTracker {
    processed: u64,
    window_start: Instant,
    window_start_count: u64,
    last_record_at: Option<Instant>,
    window: Duration,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            processed: 0,
            window_start: Instant::now(),
            window_start_count: 0,
            last_record_at: None,
            window,
        }
    }

    /// Counts one processed record and returns a sample when the current
    /// window has closed.
    pub fn record(&mut self, sequence: u32) -> Option<RateSample> {
        let now = Instant::now();
        self.processed += 1;

        if let Some(previous) = self.last_record_at.replace(now) {
            tracing::debug!(
                target: "ledgerstream::metrics",
                sequence,
                gap_ms = now.duration_since(previous).as_millis() as u64,
                "ledger processed"
            );
        }

        let elapsed = now.duration_since(self.window_start);
        if elapsed <= self.window {
            return None;
        }

        let processed_in_window = self.processed - self.window_start_count;
        let sample = RateSample {
            processed_in_window,
            elapsed,
            per_second: processed_in_window as f64 / elapsed.as_secs_f64(),
        };
        tracing::info!(
            target: "ledgerstream::metrics",
            sequence,
            processed = self.processed,
            rate = format!("{:.2}", sample.per_second),
            "ledger processing rate"
        );

        self.window_start = now;
        self.window_start_count = self.processed;
        Some(sample)
    }

    /// Cumulative count; never reset by window rollover.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}
