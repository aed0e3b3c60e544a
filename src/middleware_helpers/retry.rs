use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Fixed delay before every retry
    pub base_delay: Duration,
    /// Upper bound of the random delay added to `base_delay`
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::IngestConfig> for RetryConfig {
    fn from(cfg: &crate::config::IngestConfig) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.base_retry_delay_ms),
            max_jitter: Duration::from_millis(cfg.max_jitter_ms),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt: the base delay plus uniform jitter.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay + Duration::from_millis(jitter)
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

impl<E, F> RetryPolicy<E> for F
where
    F: Fn(&E) -> bool,
{
    fn is_retryable(&self, error: &E) -> bool {
        self(error)
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!("Operation failed after {} attempts: {}", attempt, error);
                    return Err(error);
                }

                let delay = config.next_delay();
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, config.max_attempts, error, delay
                );
                sleep(delay).await;
            }
        }
    }
}
