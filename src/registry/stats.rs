//! Registry statistics

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub live_rooms: usize,
    pub live_sessions: usize,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
}
