/*!
 * # Circuit Breaker Implementation
 *
 * Guards calls to an upstream service. After `failure_threshold` consecutive
 * failures the circuit opens and calls are rejected without reaching the
 * upstream until `timeout` has elapsed; the next call is let through
 * (half-open) and `success_threshold` successes close the circuit again.
 */

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing requests to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub timeout: Duration,
    /// Number of successful requests needed in HalfOpen to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

impl From<&crate::config::IngestConfig> for CircuitBreakerConfig {
    fn from(cfg: &crate::config::IngestConfig) -> Self {
        Self {
            failure_threshold: cfg.breaker_failure_threshold,
            timeout: Duration::from_secs(cfg.breaker_timeout_secs),
            ..Default::default()
        }
    }
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker errors
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),
    #[error(transparent)]
    ServiceFailure(E),
}

/// Circuit breaker shared between concurrent callers
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` unless the circuit is open, recording its outcome.
    pub async fn call<F, Fut, R, E>(&self, f: F) -> Result<R, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if !self.can_execute() {
            return Err(CircuitBreakerError::CircuitOpen(self.name.clone()));
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::ServiceFailure(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(), // Recover from poisoned mutex
        }
    }

    /// Check if the circuit breaker allows execution
    fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match state.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(breaker = %self.name, "circuit half-open, probing upstream");
                    true
                }
                _ => false,
            },
        }
    }

    /// Handle successful execution
    fn on_success(&self) {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                    info!(breaker = %self.name, "circuit closed");
                }
            }
        }
    }

    /// Handle failed execution
    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // Go back to open on any failure while probing
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
            }
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "owm",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout,
                success_threshold: 1,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<i32, CircuitBreakerError<&'static str>> {
        cb.call(|| async { Err::<i32, _>("upstream down") }).await
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let cb = breaker(3, Duration::from_secs(60));
        let result = cb.call(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        assert_matches!(fail(&cb).await, Err(CircuitBreakerError::ServiceFailure("upstream down")));
        assert_matches!(fail(&cb).await, Err(CircuitBreakerError::ServiceFailure(_)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_matches!(fail(&cb).await, Err(CircuitBreakerError::ServiceFailure(_)));
        assert_eq!(cb.state(), CircuitState::Open);

        let mut called = false;
        let result = cb
            .call(|| {
                called = true;
                async { Ok::<_, &str>(1) }
            })
            .await;
        assert_matches!(result, Err(CircuitBreakerError::CircuitOpen(name)) if name == "owm");
        assert!(!called);
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let cb = breaker(3, Duration::from_secs(60));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        cb.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_call_closes_or_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        cb.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
