// Bounded retry with exponential backoff, independent of what it wraps

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::errors::DownloadError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            multiplier,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Delay before retry number `retry` (1-based), clamped to `[base, max]`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let raw = self.base_delay_ms as f64 * exp;
        let clamped = raw.min(self.max_delay_ms as f64).max(self.base_delay_ms.min(self.max_delay_ms) as f64);
        Duration::from_millis(clamped as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    log::warn!("[Retry] Attempt {}/{} failed, giving up: {}", attempt, attempts, e);
                    return Err(DownloadError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "[Retry] Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
