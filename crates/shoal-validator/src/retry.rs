//! Exponential backoff for transient collaborator failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many times to try a fetch and how long to wait in between.
///
/// The wait before retry `n` (0-based) is `initial_backoff_ms × 2ⁿ`, capped
/// at `max_backoff_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_tries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 5,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_tries: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Wait before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds or `policy.max_tries` attempts have failed.
///
/// The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let tries = policy.max_tries.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < tries => {
                let backoff = policy.backoff(attempt - 1);
                warn!(
                    what,
                    attempt,
                    max_tries = tries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retry: transient failure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(what, attempts = attempt, error = %e, "retry: giving up");
                return Err(e);
            }
        }
    }
}
