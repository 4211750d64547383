use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
};

use crate::api::api_routes;
use crate::config::ServerConfig;
use crate::websocket::{ws_handler, ws_missing_room_handler};

use super::AppState;

/// JSON request bodies are tiny; anything larger is rejected early
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server);
    let static_dir = state.settings.server.static_dir.clone();

    let router = Router::new()
        // WebSocket endpoint
        .route("/ws/{room_id}", get(ws_handler))
        // `{room_id}` never matches an empty segment
        .route("/ws", get(ws_missing_room_handler))
        .route("/ws/", get(ws_missing_room_handler))
        // Merge API routes
        .merge(api_routes());

    let router = match static_dir {
        Some(dir) => {
            tracing::info!(dir = %dir, "Serving static files");
            router.fallback_service(ServeDir::new(dir))
        }
        None => router,
    };

    router
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
