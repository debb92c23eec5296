use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
}

impl RetryBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Runs `operation` until it succeeds or the attempt cap is reached. The last
/// error is returned on exhaustion.
///
/// `on_retry` receives `(attempt, delay, error, will_retry)` after every
/// failure, including the final one.
pub(crate) async fn retry_with_backoff<T, E, F, Fut, L>(
    config: RetryBackoff,
    mut operation: F,
    mut on_retry: L,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E, bool),
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let exhausted = config
                    .max_attempts
                    .map(|max| attempt >= max)
                    .unwrap_or(false);

                on_retry(attempt, backoff, &err, !exhausted);

                if exhausted {
                    return Err(err);
                }

                pause_between_attempts(backoff).await;
                backoff = next_backoff(backoff, config.max_delay);
            }
        }
    }
}

async fn pause_between_attempts(delay: Duration) {
    if delay.is_zero() {
        yield_now().await;
    } else {
        sleep(delay).await;
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
