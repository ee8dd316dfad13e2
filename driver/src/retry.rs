use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff with jitter parameters.
const BASE_DELAY_MS: f64 = 20.0;
const MULTIPLIER: f64 = 1.2;
const MAX_DELAY_MS: f64 = 60.0;
const MAX_ATTEMPTS: u32 = 4;

/// Result of a retried operation: the value, the number of attempts taken
/// (including the final, successful one), and the wall time spent sleeping
/// between attempts.
///
/// `total_delay` is measured from the first failed attempt to the last,
/// matching user-visible wall time.
#[derive(Debug, Clone, Copy)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Retry `op` with bounded exponential backoff, propagating the last failure
/// once attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(mut op: F) -> Result<RetryOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0u32;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts,
                    total_delay,
                });
            }
            Err(e) => {
                if attempts >= MAX_ATTEMPTS {
                    return Err(e);
                }

                let base_delay_ms = BASE_DELAY_MS * MULTIPLIER.powi((attempts - 1) as i32);
                let jitter: f64 = rand::rng().random_range(1.0..=2.0);
                let delay_ms = (base_delay_ms * jitter).min(MAX_DELAY_MS);
                let delay = Duration::from_millis(delay_ms.round() as u64);

                tokio::time::sleep(delay).await;
                total_delay += delay;
            }
        }
    }
}
