use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded timeout-and-retry policy for model calls
///
/// Each attempt runs under `timeout`. Transient failures (see
/// [`RelayError::is_transient`]) are retried up to `max_retries` times with
/// exponential backoff starting at `initial_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
        }
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Run `op` under this policy.
    ///
    /// # Arguments
    ///
    /// * `label` - Operation name used in log lines
    /// * `op` - Produces a fresh future for every attempt
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => {
                    log::debug!(
                        "{} took {:?} (attempt {})",
                        label,
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    let delay = self.backoff_for(attempt);
                    log::warn!(
                        "{}: retry {}/{} in {:?} after error: {}",
                        label,
                        attempt + 1,
                        self.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
