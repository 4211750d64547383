use axum::{extract::State, Json};

use crate::config::IceServerConfig;
use crate::server::AppState;

/// GET /ice-servers - STUN/TURN servers for `RTCPeerConnection`
pub async fn ice_servers(State(state): State<AppState>) -> Json<Vec<IceServerConfig>> {
    Json(state.settings.ice.servers.clone())
}
