//! Exponential backoff for provider calls that may fail transiently.

use std::{future::Future, time::Duration};

use rand::Rng;

/// Backoff policy: the delay starts at `initial_delay`, grows by `factor`
/// after every failed attempt and never exceeds `max_delay`. Every sleep
/// gets up to `jitter * delay` added at random.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_attempts: 4,
            max_delay: Duration::from_secs(10),
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter.is_finite() || self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + extra)).unwrap_or(delay)
    }

    /// Never panics, an overflowing delay is capped at `max_delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor.max(1.0))
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

/// Run `operation` until it succeeds, `retryable` rejects its error, or
/// the policy runs out of attempts. The last error is returned.
pub async fn retry_until<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay.min(policy.max_delay);
    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        if !retryable(&err) || attempt >= policy.max_attempts.max(1) {
            tracing::warn!(
                operation = %operation_name,
                attempt,
                error = %err,
                "Giving up"
            );
            return Err(err);
        }
        let sleep = policy.jittered(delay);
        tracing::debug!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = sleep.as_millis(),
            "Operation failed, retrying"
        );
        tokio::time::sleep(sleep).await;
        delay = policy.next_delay(delay);
    }
}
