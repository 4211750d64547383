//! PostgreSQL persistence module.
//!
//! Provides connection pooling and failure isolation for the room capacity table.

mod circuit_breaker;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use pool::{PostgresPool, PostgresPoolError};
