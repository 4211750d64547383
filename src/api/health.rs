//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::postgres::CircuitState;
use crate::registry::RegistryStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub live_rooms: usize,
    pub live_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub rooms: u64,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub circuit_breaker_state: String,
    pub circuit_breaker_failures: u32,
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub store: StoreHealthResponse,
}

fn circuit_state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry_stats = state.registry.stats();
    let store_stats = state.store.stats().await;

    let postgres = state.postgres_pool.as_ref().map(|pool| {
        let breaker = pool.circuit_breaker().stats();
        PostgresHealthResponse {
            circuit_breaker_state: circuit_state_name(breaker.state).to_string(),
            circuit_breaker_failures: breaker.failure_count,
            pool_size: pool.pool().size(),
            idle_connections: pool.pool().num_idle() as u32,
        }
    });

    let degraded = postgres
        .as_ref()
        .is_some_and(|pg| pg.circuit_breaker_state != "closed");

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealthResponse {
            backend: store_stats.backend,
            rooms: store_stats.rooms,
        },
        postgres,
        live_rooms: registry_stats.live_rooms,
        live_sessions: registry_stats.live_sessions,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let store_stats = state.store.stats().await;

    Json(StatsResponse {
        registry: state.registry.stats(),
        store: StoreHealthResponse {
            backend: store_stats.backend,
            rooms: store_stats.rooms,
        },
    })
}
