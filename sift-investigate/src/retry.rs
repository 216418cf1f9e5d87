use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th failed attempt: base doubled per failure, capped.
    pub fn next_retry_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `operation` until it succeeds or the policy's attempt budget is spent.
pub async fn retry_async<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                error!(operation = operation_name, attempts = attempt, error = %err, "retries exhausted");
                return Err(RetryExhausted { attempts: attempt, last: err });
            }
            Err(err) => {
                let delay = policy.next_retry_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    ?delay,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
