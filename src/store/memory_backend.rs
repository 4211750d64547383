//! In-memory capacity store using DashMap.
//!
//! Rooms are lost on restart. Each row sits behind its own async mutex; a
//! pending reservation owns that mutex guard, which gives the same
//! serialization a `SELECT ... FOR UPDATE` row lock gives the PostgreSQL
//! backend. Deleted rows are tombstoned (`None`) before being unlinked from the
//! map, so a reservation that raced the delete sees `RoomNotFound`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::ROOM_CAPACITY;

use super::backend::{
    CapacityStore, CapacityStoreStats, ReleaseOutcome, Reservation, RoomRecord, RoomState,
    StoreError,
};

type Row = Arc<Mutex<Option<RoomRecord>>>;

/// In-memory capacity store.
pub struct MemoryCapacityStore {
    rooms: DashMap<String, Row>,
}

impl MemoryCapacityStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    fn row(&self, id: &str) -> Option<Row> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Unlink a tombstoned row, unless a newer room already took the id.
    fn unlink(&self, id: &str, row: &Row) {
        self.rooms.remove_if(id, |_, current| Arc::ptr_eq(current, row));
    }
}

impl Default for MemoryCapacityStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryReservation {
    guard: OwnedMutexGuard<Option<RoomRecord>>,
    room_id: String,
    admitted: i32,
}

#[async_trait]
impl Reservation for MemoryReservation {
    fn admitted(&self) -> i32 {
        self.admitted
    }

    async fn commit(self: Box<Self>) -> Result<i32, StoreError> {
        let mut this = *self;
        match this.guard.as_mut() {
            Some(record) => {
                record.admitted_count = this.admitted;
                Ok(this.admitted)
            }
            // unreachable while the guard is held, the row was live at reserve time
            None => Err(StoreError::RoomNotFound(this.room_id)),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl CapacityStore for MemoryCapacityStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, id: &str) -> Result<RoomRecord, StoreError> {
        let record = RoomRecord::new(id);

        match self.rooms.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                // A tombstone awaiting unlink can be reused; a locked row is live.
                let reusable = entry
                    .get()
                    .try_lock()
                    .map(|row| row.is_none())
                    .unwrap_or(false);
                if !reusable {
                    return Err(StoreError::DuplicateRoom(id.to_string()));
                }
                entry.insert(Arc::new(Mutex::new(Some(record.clone()))));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(Some(record.clone()))));
            }
        }

        tracing::debug!(room_id = %id, "Room created");
        Ok(record)
    }

    async fn reserve(&self, id: &str) -> Result<Box<dyn Reservation>, StoreError> {
        let row = self
            .row(id)
            .ok_or_else(|| StoreError::RoomNotFound(id.to_string()))?;

        let guard = row.lock_owned().await;
        let current = match guard.as_ref() {
            Some(record) => record.admitted_count,
            None => return Err(StoreError::RoomNotFound(id.to_string())),
        };

        if current >= ROOM_CAPACITY {
            return Err(StoreError::RoomFull(id.to_string()));
        }

        Ok(Box::new(MemoryReservation {
            guard,
            room_id: id.to_string(),
            admitted: current + 1,
        }))
    }

    async fn release(&self, id: &str) -> Result<ReleaseOutcome, StoreError> {
        let Some(row) = self.row(id) else {
            return Ok(ReleaseOutcome::Missing);
        };

        let mut guard = row.lock().await;
        let Some(record) = guard.as_mut() else {
            return Ok(ReleaseOutcome::Missing);
        };

        record.admitted_count -= 1;
        if record.admitted_count > 0 {
            return Ok(ReleaseOutcome::Decremented {
                remaining: record.admitted_count,
            });
        }

        *guard = None;
        drop(guard);
        self.unlink(id, &row);

        tracing::debug!(room_id = %id, "Last slot released, room deleted");
        Ok(ReleaseOutcome::Deleted)
    }

    async fn get(&self, id: &str) -> Result<RoomState, StoreError> {
        let Some(row) = self.row(id) else {
            return Ok(RoomState::missing());
        };

        let guard = row.lock().await;
        Ok(match guard.as_ref() {
            Some(record) => RoomState {
                count: record.admitted_count,
                exists: true,
            },
            None => RoomState::missing(),
        })
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows: Vec<(String, Row)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (id, row) in rows {
            let mut guard = row.lock().await;
            let stale = matches!(
                guard.as_ref(),
                Some(record) if record.admitted_count == 0 && record.created_at < older_than
            );
            if stale {
                *guard = None;
                drop(guard);
                self.unlink(&id, &row);
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn stats(&self) -> CapacityStoreStats {
        CapacityStoreStats {
            backend: self.backend_name().to_string(),
            rooms: self.rooms.len() as u64,
        }
    }
}
