//! Capacity store factory

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::postgres::PostgresPool;

use super::backend::CapacityStore;
use super::memory_backend::MemoryCapacityStore;
use super::postgres_backend::PostgresCapacityStore;

/// Create a capacity store based on configuration.
///
/// - `"postgres"`: a `PostgresCapacityStore` if a pool is provided
/// - `"memory"` (default): a `MemoryCapacityStore`
///
/// ```rust,ignore
/// let store = create_capacity_store(&settings.store, Some(pg_pool.clone()));
/// ```
pub fn create_capacity_store(
    settings: &StoreConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn CapacityStore> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL capacity store");
                Arc::new(PostgresCapacityStore::new(pool))
            } else {
                tracing::warn!(
                    "PostgreSQL backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryCapacityStore::new())
            }
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory capacity store");
            Arc::new(MemoryCapacityStore::new())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown store backend, using memory");
            Arc::new(MemoryCapacityStore::new())
        }
    }
}
