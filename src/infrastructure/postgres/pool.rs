//! PostgreSQL connection pool with circuit breaker integration.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;

use super::CircuitBreaker;

#[derive(Debug, Error)]
pub enum PostgresPoolError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// PostgreSQL connection pool with circuit breaker integration.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
    circuit_breaker: Arc<CircuitBreaker>,
    /// Kept for logging only, see `database_url_masked`
    database_url: String,
}

impl PostgresPool {
    /// Create a new PostgreSQL pool from configuration.
    pub async fn new(
        config: &DatabaseConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PostgresPoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds as u64))
            .connect(&config.url)
            .await?;

        let this = Self {
            pool,
            circuit_breaker,
            database_url: config.url.clone(),
        };

        tracing::info!(
            pool_size = config.pool_size,
            url = %this.database_url_masked(),
            "PostgreSQL connection pool created"
        );

        Ok(this)
    }

    /// Wrap an existing pool (used by tests that manage their own database).
    pub fn from_pool(pool: PgPool, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            pool,
            circuit_breaker,
            database_url: String::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Fail fast while the breaker is open.
    pub fn ensure_available(&self) -> Result<(), PostgresPoolError> {
        if self.circuit_breaker.allow_request() {
            Ok(())
        } else {
            Err(PostgresPoolError::CircuitOpen)
        }
    }

    /// Feed the outcome of a database round-trip into the breaker.
    pub fn observe<T>(&self, result: &Result<T, sqlx::Error>) {
        match result {
            Ok(_) => self.circuit_breaker.record_success(),
            // Row-level outcomes are not availability failures
            Err(sqlx::Error::RowNotFound) => self.circuit_breaker.record_success(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                self.circuit_breaker.record_success()
            }
            Err(_) => self.circuit_breaker.record_failure(),
        }
    }

    /// Get the database URL (masked for logging).
    pub fn database_url_masked(&self) -> String {
        mask_url(&self.database_url)
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }
}

fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // scheme separator is not a password delimiter
            if !url[colon_pos..].starts_with("://") {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}***{}", prefix, suffix);
            }
        }
    }
    url.to_string()
}
