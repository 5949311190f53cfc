use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy applied around a single rule's fetch pipeline.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

/// Runs `f` until it succeeds, the error is not retryable, or attempts run out.
pub async fn retry_async<F, Fut, T, E, P>(config: &RetryConfig, should_retry: P, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config.backoff_factor);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Grows `delay` by `factor`. Factors that would shrink the delay, or make
/// it negative or non-finite, keep it unchanged.
fn next_delay(delay: Duration, factor: f64) -> Duration {
    if !factor.is_finite() || factor < 1.0 {
        return delay;
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
