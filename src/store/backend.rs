//! Backend trait for the room capacity store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during capacity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room already admitted its two peers
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Generated id collided with an existing room
    #[error("Room already exists: {0}")]
    DuplicateRoom(String),

    /// Backend is temporarily unavailable (e.g., circuit breaker open)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl StoreError {
    /// True for infrastructure failures, as opposed to room-state outcomes.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Postgres(_))
    }
}

/// Durable room row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomRecord {
    pub id: String,
    /// Always within `0..=ROOM_CAPACITY`
    pub admitted_count: i32,
    pub created_at: DateTime<Utc>,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admitted_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Result of `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomState {
    pub count: i32,
    pub exists: bool,
}

impl RoomState {
    pub fn missing() -> Self {
        Self {
            count: 0,
            exists: false,
        }
    }
}

/// Result of `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// A slot was freed; the room still has `remaining` admitted peers
    Decremented { remaining: i32 },
    /// The last slot was freed and the room deleted
    Deleted,
    /// No such room; nothing changed
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityStoreStats {
    pub backend: String,
    pub rooms: u64,
}

/// A reserved but not yet committed admission slot.
///
/// Holds a row-level lock on the room until it is committed or rolled back.
/// Dropping a reservation without committing rolls it back.
#[async_trait]
pub trait Reservation: Send {
    /// Admitted count the room will have once committed
    fn admitted(&self) -> i32;

    /// Durably consume the slot. Returns the committed count.
    async fn commit(self: Box<Self>) -> Result<i32, StoreError>;

    /// Undo the reservation, leaving the room untouched.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable per-room admission counter.
///
/// # Thread Safety
///
/// Implementations are shared across every admission task, so they must be
/// `Send + Sync`. Concurrent `reserve` calls for the same room must serialize
/// on the room row so no two of them observe the same pre-increment count.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Backend type identifier
    fn backend_name(&self) -> &'static str;

    /// Insert a room with zero admitted peers.
    async fn create(&self, id: &str) -> Result<RoomRecord, StoreError>;

    /// Begin admitting a peer. Fails with `RoomNotFound` or `RoomFull`
    /// without mutating anything.
    async fn reserve(&self, id: &str) -> Result<Box<dyn Reservation>, StoreError>;

    /// Free one slot, deleting the room when none remain. Missing rooms are
    /// a no-op.
    async fn release(&self, id: &str) -> Result<ReleaseOutcome, StoreError>;

    /// Committed admitted count and existence.
    async fn get(&self, id: &str) -> Result<RoomState, StoreError>;

    /// Delete rooms that never admitted a peer and were created before
    /// `older_than`. Returns how many were removed.
    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(&self) -> CapacityStoreStats;
}
