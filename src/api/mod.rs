//! API layer - HTTP endpoint handlers.

mod health;
mod ice;
mod metrics;
mod rooms;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use ice::ice_servers;
pub use metrics::prometheus_metrics;
pub use rooms::{
    create_room, create_unique_room, generate_room_id, join_room, CreateRoomResponse,
    JoinRoomRequest, JoinRoomResponse,
};
pub use routes::api_routes;
