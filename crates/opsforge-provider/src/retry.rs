//! Retry with exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::provider::{ErrorKind, ProviderError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n` (1-based): `base * multiplier^(n-1)`,
    /// clamped at `max_delay`, with optional ±25 % jitter. A server-supplied
    /// `Retry-After` wins over the computed backoff.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }

        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut millis = (self.base_delay.as_millis() as f64 * exp) as u64;
        millis = millis.min(self.max_delay.as_millis() as u64);

        if self.jitter && millis > 0 {
            let spread = millis / 4;
            let low = millis - spread;
            let high = millis + spread;
            millis = rand::rng().random_range(low..=high);
        }

        Duration::from_millis(millis)
    }
}

/// Run `op` up to `policy.max_attempts` times, backing off between transient
/// failures. Permanent errors are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, op: F) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == ErrorKind::Transient && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, err.retry_after());
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempt, error = %err, "provider call failed");
                return Err(err);
            }
        }
    }
}
