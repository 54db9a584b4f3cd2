//! Circuit breaker guarding calls to the exchange REST API.
//!
//! `Closed` lets calls through and counts consecutive failures. Reaching the
//! failure threshold opens the breaker, which rejects calls until the cool-down
//! has elapsed. The next call then runs in `HalfOpen`: enough consecutive
//! successes close the breaker again, a single failure reopens it.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open: {0}")]
    Open(String),

    #[error(transparent)]
    Inner(E),
}

struct Counters {
    state: CircuitState,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            counters: Mutex::new(Counters {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `f` unless the breaker is open, and record its outcome.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit().await.map_err(CircuitBreakerError::Open)?;

        let outcome = f.await;
        self.record(outcome.is_ok()).await;
        outcome.map_err(CircuitBreakerError::Inner)
    }

    pub async fn state(&self) -> CircuitState {
        self.counters.lock().await.state
    }

    async fn admit(&self) -> Result<(), String> {
        let mut c = self.counters.lock().await;
        if c.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = c.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.settings.open_timeout {
            info!("CircuitBreaker [{}]: Open -> HalfOpen", self.name);
            c.state = CircuitState::HalfOpen;
            c.successes = 0;
            return Ok(());
        }

        Err(format!(
            "[{}] retry in {:?}",
            self.name,
            self.settings.open_timeout - elapsed
        ))
    }

    async fn record(&self, success: bool) {
        let mut c = self.counters.lock().await;
        match (c.state, success) {
            (CircuitState::Closed, true) => c.failures = 0,
            (CircuitState::Closed, false) => {
                c.failures += 1;
                if c.failures >= self.settings.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Closed -> Open after {} consecutive failures",
                        self.name, c.failures
                    );
                    c.state = CircuitState::Open;
                    c.opened_at = Some(Instant::now());
                }
            }
            (CircuitState::HalfOpen, true) => {
                c.successes += 1;
                if c.successes >= self.settings.success_threshold {
                    info!("CircuitBreaker [{}]: HalfOpen -> Closed", self.name);
                    c.state = CircuitState::Closed;
                    c.failures = 0;
                    c.successes = 0;
                }
            }
            (CircuitState::HalfOpen, false) => {
                warn!("CircuitBreaker [{}]: HalfOpen -> Open (trial call failed)", self.name);
                c.state = CircuitState::Open;
                c.opened_at = Some(Instant::now());
                c.successes = 0;
            }
            // A call admitted just before another one tripped the breaker
            (CircuitState::Open, _) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(failures: usize, successes: usize, timeout_ms: u64) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold: failures,
            success_threshold: successes,
            open_timeout: Duration::from_millis(timeout_ms),
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb.call(async { Err::<(), &str>("boom") }).await;
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures_and_fails_fast() {
        let cb = CircuitBreaker::new("klines", settings(3, 2, 60_000));
        for _ in 0..3 {
            fail(&cb).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new("klines", settings(2, 1, 60_000));
        fail(&cb).await;
        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_successes() {
        let cb = CircuitBreaker::new("klines", settings(2, 2, 50));
        fail(&cb).await;
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.call(async { Ok::<(), &str>(()) }).await.unwrap();
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::new("klines", settings(2, 2, 50));
        fail(&cb).await;
        fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
