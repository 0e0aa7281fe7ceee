use std::future::Future;
use std::time::Duration;
use tracing::warn;

use pkg_constants::retry::{
    BACKOFF_SCHEDULE_SECS, CONFLICT_RETRIES, CONFLICT_RETRY_DELAY_SECS, MAX_TRANSIENT_ATTEMPTS,
};

use crate::gateway::{GatewayError, RetryClass};

/// Bounded retry for gateway calls.
///
/// Conflicts get `conflict_retries` extra tries after `conflict_delay`.
/// Rate limits and server errors are retried until `max_attempts` total
/// attempts, sleeping per `backoff` in between. Everything else returns
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
    pub conflict_retries: u32,
    pub conflict_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_TRANSIENT_ATTEMPTS,
            backoff: BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            conflict_retries: CONFLICT_RETRIES,
            conflict_delay: Duration::from_secs(CONFLICT_RETRY_DELAY_SECS),
        }
    }
}

/// Result of a retried call plus how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub result: Result<T, GatewayError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Vec::new(),
            conflict_retries: 0,
            conflict_delay: Duration::ZERO,
        }
    }

    /// Delay slept after the `attempt`-th transient failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        let mut transient = 0;
        let mut conflicts = 0;
        loop {
            attempts += 1;
            let err = match op().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(err) => err,
            };

            let delay = match err.retry_class() {
                RetryClass::Conflict if conflicts < self.conflict_retries => {
                    conflicts += 1;
                    self.conflict_delay
                }
                RetryClass::Transient if transient + 1 < self.max_attempts => {
                    transient += 1;
                    self.delay_after(transient)
                }
                _ => {
                    return Attempted {
                        result: Err(err),
                        attempts,
                    };
                }
            };

            warn!(
                "Retry: {} failed on attempt {} ({}), retrying in {:?}",
                what, attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
