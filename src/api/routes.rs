use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::ice::ice_servers;
use super::metrics::prometheus_metrics;
use super::rooms::{create_room, join_room};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Rooms
        .route("/create-room", post(create_room))
        .route("/join-room", post(join_room))
        .route("/ice-servers", get(ice_servers))
}
