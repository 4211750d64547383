//! PostgreSQL capacity store.
//!
//! One row per room in `rooms`. `reserve` opens a transaction and takes the
//! row lock with `SELECT ... FOR UPDATE`; the transaction stays open inside the
//! returned reservation until the caller commits or rolls back.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use crate::config::ROOM_CAPACITY;
use crate::metrics::StoreMetrics;
use crate::postgres::{PostgresPool, PostgresPoolError};

use super::backend::{
    CapacityStore, CapacityStoreStats, ReleaseOutcome, Reservation, RoomRecord, RoomState,
    StoreError,
};

const BACKEND: &str = "postgres";

pub const ROOMS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    admitted_count INTEGER NOT NULL DEFAULT 0 CHECK (admitted_count BETWEEN 0 AND 2),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const ROOMS_SWEEP_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS rooms_unadmitted_created_at
    ON rooms (created_at) WHERE admitted_count = 0
"#;

pub struct PostgresCapacityStore {
    pool: Arc<PostgresPool>,
}

impl PostgresCapacityStore {
    pub fn new(pool: Arc<PostgresPool>) -> Self {
        Self { pool }
    }

    /// Create the rooms table and sweep index if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(ROOMS_SCHEMA).execute(self.pool.pool()).await?;
        sqlx::query(ROOMS_SWEEP_INDEX)
            .execute(self.pool.pool())
            .await?;
        tracing::info!("Rooms table ready");
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        self.pool.ensure_available().map_err(|e| match e {
            PostgresPoolError::CircuitOpen => StoreError::Unavailable(e.to_string()),
            PostgresPoolError::Sqlx(e) => StoreError::Postgres(e),
        })
    }

    /// Record latency, breaker state and error metrics for one operation.
    fn track<T>(
        &self,
        operation: &str,
        start: Instant,
        result: Result<T, sqlx::Error>,
    ) -> Result<T, sqlx::Error> {
        StoreMetrics::record_latency(BACKEND, operation, start.elapsed());
        self.pool.observe(&result);
        if let Err(e) = &result {
            StoreMetrics::record_error(BACKEND, operation);
            tracing::warn!(operation = %operation, error = %e, "Capacity store operation failed");
        }
        result
    }

    async fn lock_count(
        tx: &mut Transaction<'static, Postgres>,
        id: &str,
    ) -> Result<Option<i32>, sqlx::Error> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT admitted_count FROM rooms WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(row.map(|(count,)| count))
    }
}

struct PostgresReservation {
    tx: Transaction<'static, Postgres>,
    pool: Arc<PostgresPool>,
    admitted: i32,
}

#[async_trait]
impl Reservation for PostgresReservation {
    fn admitted(&self) -> i32 {
        self.admitted
    }

    async fn commit(self: Box<Self>) -> Result<i32, StoreError> {
        let this = *self;
        let start = Instant::now();
        let result = this.tx.commit().await;
        StoreMetrics::record_latency(BACKEND, "commit", start.elapsed());
        this.pool.observe(&result);
        if result.is_err() {
            StoreMetrics::record_error(BACKEND, "commit");
        }
        result?;
        Ok(this.admitted)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let result = this.tx.rollback().await;
        this.pool.observe(&result);
        result?;
        Ok(())
    }
}

#[async_trait]
impl CapacityStore for PostgresCapacityStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn create(&self, id: &str) -> Result<RoomRecord, StoreError> {
        self.ensure_available()?;
        let start = Instant::now();

        let result: Result<(DateTime<Utc>,), sqlx::Error> = sqlx::query_as(
            "INSERT INTO rooms (id, admitted_count, created_at) VALUES ($1, 0, NOW()) RETURNING created_at",
        )
        .bind(id)
        .fetch_one(self.pool.pool())
        .await;

        match self.track("create", start, result) {
            Ok((created_at,)) => Ok(RoomRecord {
                id: id.to_string(),
                admitted_count: 0,
                created_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateRoom(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reserve(&self, id: &str) -> Result<Box<dyn Reservation>, StoreError> {
        self.ensure_available()?;
        let start = Instant::now();

        let result = async {
            let mut tx = self.pool.pool().begin().await?;
            let current = Self::lock_count(&mut tx, id).await?;
            if let Some(count) = current {
                if count < ROOM_CAPACITY {
                    sqlx::query("UPDATE rooms SET admitted_count = $2 WHERE id = $1")
                        .bind(id)
                        .bind(count + 1)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            Ok::<_, sqlx::Error>((tx, current))
        }
        .await;

        // An early return drops `tx`, which rolls the transaction back.
        let (tx, current) = self.track("reserve", start, result)?;
        let count = current.ok_or_else(|| StoreError::RoomNotFound(id.to_string()))?;
        if count >= ROOM_CAPACITY {
            return Err(StoreError::RoomFull(id.to_string()));
        }

        Ok(Box::new(PostgresReservation {
            tx,
            pool: self.pool.clone(),
            admitted: count + 1,
        }))
    }

    async fn release(&self, id: &str) -> Result<ReleaseOutcome, StoreError> {
        self.ensure_available()?;
        let start = Instant::now();

        let result = async {
            let mut tx = self.pool.pool().begin().await?;
            let outcome = match Self::lock_count(&mut tx, id).await? {
                None => ReleaseOutcome::Missing,
                Some(count) if count <= 1 => {
                    sqlx::query("DELETE FROM rooms WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    ReleaseOutcome::Deleted
                }
                Some(count) => {
                    sqlx::query("UPDATE rooms SET admitted_count = admitted_count - 1 WHERE id = $1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    ReleaseOutcome::Decremented {
                        remaining: count - 1,
                    }
                }
            };
            tx.commit().await?;
            Ok::<_, sqlx::Error>(outcome)
        }
        .await;

        Ok(self.track("release", start, result)?)
    }

    async fn get(&self, id: &str) -> Result<RoomState, StoreError> {
        self.ensure_available()?;
        let start = Instant::now();

        let result: Result<Option<(i32,)>, sqlx::Error> =
            sqlx::query_as("SELECT admitted_count FROM rooms WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.pool())
                .await;

        Ok(match self.track("get", start, result)? {
            Some((count,)) => RoomState {
                count,
                exists: true,
            },
            None => RoomState::missing(),
        })
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let start = Instant::now();

        let result = sqlx::query("DELETE FROM rooms WHERE admitted_count = 0 AND created_at < $1")
            .bind(older_than)
            .execute(self.pool.pool())
            .await;

        Ok(self.track("sweep", start, result)?.rows_affected())
    }

    async fn stats(&self) -> CapacityStoreStats {
        let rooms = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM rooms")
            .fetch_one(self.pool.pool())
            .await
            .map(|(count,)| count.max(0) as u64)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to count rooms");
                0
            });

        CapacityStoreStats {
            backend: BACKEND.to_string(),
            rooms,
        }
    }
}

#[cfg(test)]
mod tests {
    //! These run against a live database: `DATABASE_URL=... cargo test -- --ignored`

    use super::*;
    use crate::postgres::CircuitBreaker;
    use sqlx::postgres::PgPoolOptions;

    async fn store() -> PostgresCapacityStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPoolOptions::new().max_connections(12).connect(&url).await.unwrap();
        let pool = PostgresPool::from_pool(pool, Arc::new(CircuitBreaker::new()));
        let store = PostgresCapacityStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    fn unique_id(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    #[ignore]
    async fn test_reserve_commit_release_cycle() {
        let store = store().await;
        let id = unique_id("cycle");
        store.create(&id).await.unwrap();

        assert_eq!(store.reserve(&id).await.unwrap().commit().await.unwrap(), 1);
        assert_eq!(store.reserve(&id).await.unwrap().commit().await.unwrap(), 2);
        assert!(matches!(store.reserve(&id).await.err().unwrap(), StoreError::RoomFull(_)));

        assert_eq!(
            store.release(&id).await.unwrap(),
            ReleaseOutcome::Decremented { remaining: 1 }
        );
        assert_eq!(store.release(&id).await.unwrap(), ReleaseOutcome::Deleted);
        assert!(!store.get(&id).await.unwrap().exists);
    }

    #[tokio::test]
    #[ignore]
    async fn test_duplicate_create() {
        let store = store().await;
        let id = unique_id("dup");
        store.create(&id).await.unwrap();
        assert!(matches!(store.create(&id).await.unwrap_err(), StoreError::DuplicateRoom(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_rollback_restores_count() {
        let store = store().await;
        let id = unique_id("rollback");
        store.create(&id).await.unwrap();

        store.reserve(&id).await.unwrap().rollback().await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_concurrent_reservations_admit_exactly_two() {
        let store = Arc::new(store().await);
        let id = unique_id("race");
        store.create(&id).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.reserve(&id).await?.commit().await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(StoreError::RoomFull(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(admitted, 2);
        assert_eq!(store.get(&id).await.unwrap().count, 2);
    }
}
