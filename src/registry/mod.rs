//! Room registry - in-memory view of who is currently reachable in each room.

mod registry;
mod stats;
mod types;

pub use registry::{AddOutcome, BroadcastOutcome, RegistryError, RoomRegistry};
pub use stats::RegistryStats;
pub use types::{LiveRoom, RelayFrame, SessionHandle, READY_PAYLOAD};
