use crate::buffer::record::LedgerRecord;
use crate::processor::backoff::{
    retry_with_backoff, sleep_with_cancellation, RetryBackoff, RetryFailure,
};
use crate::store::client::{FetchError, FileFetchError};
use crate::store::schema::LedgerFile;
use anyhow::Result;

use super::process::Worker;
use super::types::FileOutcome;

impl Worker {
    /// Fetches one file, retrying failures and, in an unbounded range, polling
    /// until the file is published.
    pub(super) async fn fetch_file(&self, file: &LedgerFile) -> Result<FileOutcome, FetchError> {
        loop {
            let backoff = RetryBackoff::fixed(self.retry_wait)
                .with_retry_limit(self.retry_limit)
                .with_cancellation(&self.shutdown);

            let result = retry_with_backoff(
                backoff,
                |_attempt| self.fetch_once(file),
                |attempt, delay, err, will_retry| {
                    if will_retry {
                        self.telemetry.record_fetch_retry();
                        tracing::warn!(
                            worker = self.id,
                            file = %file,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "ledger file fetch failed; retrying"
                        );
                    }
                },
            )
            .await;

            match result {
                Ok(Some(records)) => {
                    self.telemetry.record_file_fetched();
                    return Ok(FileOutcome::Ready(records));
                }
                Ok(None) => {
                    tracing::debug!(
                        worker = self.id,
                        file = %file,
                        "ledger file not published yet; polling"
                    );
                    if !sleep_with_cancellation(self.retry_wait, Some(&self.shutdown)).await {
                        return Ok(FileOutcome::Cancelled);
                    }
                }
                Err(RetryFailure::Cancelled) => return Ok(FileOutcome::Cancelled),
                Err(RetryFailure::Exhausted {
                    attempts,
                    last_error,
                }) => {
                    self.telemetry.record_fetch_failure();
                    return Err(FetchError::new(file.clone(), attempts, last_error));
                }
            }
        }
    }

    /// A single attempt. An unpublished file is an error in a bounded range
    /// and `Ok(None)` otherwise.
    async fn fetch_once(&self, file: &LedgerFile) -> Result<Option<Vec<LedgerRecord>>> {
        match self.store.get_file(file).await? {
            Some(records) => Ok(Some(validate_file(file, records)?)),
            None if self.range.is_bounded() => Err(FileFetchError::Missing {
                key: file.key.clone(),
            }
            .into()),
            None => Ok(None),
        }
    }
}

/// Checks that `records` hold exactly the sequences of `file`, in order.
pub(super) fn validate_file(
    file: &LedgerFile,
    records: Vec<LedgerRecord>,
) -> Result<Vec<LedgerRecord>, FileFetchError> {
    let malformed = |expected: u32, found: Option<u32>| FileFetchError::Malformed {
        key: file.key.clone(),
        expected,
        found,
    };

    for (offset, record) in records.iter().enumerate() {
        let expected = u32::try_from(offset)
            .ok()
            .and_then(|offset| file.start.checked_add(offset))
            .filter(|sequence| *sequence <= file.end);
        match expected {
            Some(expected) if record.sequence() == expected => {}
            Some(expected) => return Err(malformed(expected, Some(record.sequence()))),
            None => return Err(malformed(file.end, Some(record.sequence()))),
        }
    }

    let span = u64::from(file.end) - u64::from(file.start) + 1;
    if (records.len() as u64) < span {
        let missing = file.start + records.len() as u32;
        return Err(malformed(missing, None));
    }

    Ok(records)
}
