//! Capacity store: the durable source of truth for how many peers a room
//! has admitted.
//!
//! Admission is two-phase. `reserve` returns a pending [`Reservation`] that
//! holds the room's row lock; the caller commits it once the transport
//! upgrade has succeeded, or rolls it back (explicitly or by dropping it).

mod backend;
mod factory;
mod memory_backend;
mod postgres_backend;

pub use backend::{
    CapacityStore, CapacityStoreStats, ReleaseOutcome, Reservation, RoomRecord, RoomState,
    StoreError,
};
pub use factory::create_capacity_store;
pub use memory_backend::MemoryCapacityStore;
pub use postgres_backend::{PostgresCapacityStore, ROOMS_SCHEMA};
