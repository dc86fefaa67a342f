use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Retry policy for store reads: a fixed delay between attempts and an
/// optional cap on the total number of attempts.
#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    /// `retry_limit` retries on top of the initial attempt.
    pub(crate) fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.max_attempts = Some((retry_limit as usize).saturating_add(1));
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[derive(Debug)]
pub(crate) enum RetryFailure {
    Cancelled,
    Exhausted {
        attempts: usize,
        last_error: anyhow::Error,
    },
}

pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
) -> Result<T, RetryFailure>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if is_cancelled(config.cancellation) {
            return Err(RetryFailure::Cancelled);
        }

        let outcome = match config.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(RetryFailure::Cancelled),
                outcome = operation(attempt) => outcome,
            },
            None => operation(attempt).await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                let exhausted = config
                    .max_attempts
                    .map(|max| attempt >= max)
                    .unwrap_or(false);

                on_retry(attempt, config.delay, &err, !exhausted);

                if exhausted {
                    return Err(RetryFailure::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                if !sleep_with_cancellation(config.delay, config.cancellation).await {
                    return Err(RetryFailure::Cancelled);
                }
            }
        }
    }
}

/// Sleeps for `delay`, returning `false` if the token fired first.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !is_cancelled(cancellation);
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

fn is_cancelled(cancellation: Option<&CancellationToken>) -> bool {
    cancellation.map(CancellationToken::is_cancelled).unwrap_or(false)
}
