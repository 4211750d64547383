//! Circuit breaker around PostgreSQL round-trips.
//!
//! Consecutive pool or query failures open the breaker. While it is open,
//! admissions fail fast with `StoreUnavailable` instead of waiting on
//! `connect_timeout` for every attempt. Once `reset_timeout` has passed the
//! breaker goes half-open and lets requests through until enough of them
//! succeed (closed again) or one fails (open again).

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::DatabaseConfig;

/// Successful round-trips needed in half-open before closing.
const HALF_OPEN_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// How long the breaker stays open before letting requests through again
    pub reset_timeout: Duration,
}

impl From<&DatabaseConfig> for CircuitBreakerConfig {
    fn from(db: &DatabaseConfig) -> Self {
        Self {
            failure_threshold: db.breaker_failure_threshold.max(1),
            success_threshold: HALF_OPEN_SUCCESSES,
            reset_timeout: Duration::from_secs(db.breaker_reset_seconds),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Instant,
}

impl Inner {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.successes = 0;
        self.opened_at = Instant::now();
    }
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn from_database(db: &DatabaseConfig) -> Self {
        Self::with_config(CircuitBreakerConfig::from(db))
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: Instant::now(),
            }),
            config,
        }
    }

    /// Locks the state, first moving an expired open breaker to half-open.
    /// Never held across an await point.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == CircuitState::Open
            && inner.opened_at.elapsed() >= self.config.reset_timeout
        {
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            tracing::info!("Store circuit breaker half-open, letting requests through");
        }
        inner
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    tracing::info!("Store circuit breaker closed, database reachable again");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.open();
                    tracing::warn!(
                        failures = inner.failures,
                        reset_after_secs = self.config.reset_timeout.as_secs(),
                        "Store circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open();
                tracing::warn!("Store circuit breaker reopened, database still failing");
            }
            // A late failure from a request admitted before opening
            CircuitState::Open => inner.opened_at = Instant::now(),
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(failure_threshold: u32, reset_seconds: u64) -> DatabaseConfig {
        DatabaseConfig {
            breaker_failure_threshold: failure_threshold,
            breaker_reset_seconds: reset_seconds,
            ..DatabaseConfig::default()
        }
    }

    fn breaker(failure_threshold: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: HALF_OPEN_SUCCESSES,
            reset_timeout,
        })
    }

    #[test]
    fn test_config_follows_database_settings() {
        let config = CircuitBreakerConfig::from(&database(3, 30));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));

        let defaults = CircuitBreakerConfig::default();
        assert_eq!(defaults.failure_threshold, 5);
        assert_eq!(defaults.reset_timeout, Duration::from_secs(10));

        assert_eq!(CircuitBreakerConfig::from(&database(0, 10)).failure_threshold, 1);
    }

    #[test]
    fn test_database_threshold_opens_breaker() {
        let cb = CircuitBreaker::from_database(&database(2, 60));
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 2);
    }

    #[test]
    fn test_recovers_through_half_open() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.inner.lock().unwrap().state, CircuitState::Open);
    }
}
