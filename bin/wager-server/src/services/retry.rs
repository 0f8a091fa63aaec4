use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use tracing::warn;

/// Bounded exponential backoff: at most `max_attempts` tries in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: initial_delay.saturating_mul(32),
        }
    }

    /// Delay before retry number `retry_count + 1` of a deferred unit of work,
    /// doubling each time and capped at `max_delay`.
    #[must_use]
    pub fn deferral(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 20) as u32;
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or `policy.max_attempts` is reached. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: RetryPolicy,
    operation: &str,
    is_transient: C,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_delay)
        .with_max_interval(policy.max_delay)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    retry_notify(
        backoff,
        || {
            attempt += 1;
            let exhausted = attempt >= policy.max_attempts;
            let fut = f();
            let is_transient = &is_transient;
            async move {
                fut.await.map_err(|e| {
                    if !exhausted && is_transient(&e) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |e: E, wait: Duration| {
            warn!(operation, error = %e, ?wait, "Transient failure, retrying");
        },
    )
    .await
}
