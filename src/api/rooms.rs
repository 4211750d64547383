//! Room creation and advisory join check.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};

use crate::config::{RoomsConfig, ROOM_CAPACITY};
use crate::error::AppError;
use crate::metrics::{ROOMS_CREATED_TOTAL, ROOM_ID_COLLISIONS_TOTAL};
use crate::server::AppState;
use crate::store::{CapacityStore, StoreError};
use crate::websocket::is_valid_room_id;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub room_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub status: String,
}

/// Random alphanumeric room id of the given length.
pub fn generate_room_id(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), length)
}

/// Create a room under a fresh id, retrying on collision.
pub async fn create_unique_room(
    store: &dyn CapacityStore,
    config: &RoomsConfig,
) -> Result<String, AppError> {
    for attempt in 1..=config.max_id_attempts {
        let id = generate_room_id(config.id_length);
        match store.create(&id).await {
            Ok(record) => {
                ROOMS_CREATED_TOTAL.inc();
                tracing::info!(room_id = %record.id, attempt = attempt, "Room created");
                return Ok(record.id);
            }
            Err(StoreError::DuplicateRoom(_)) => {
                ROOM_ID_COLLISIONS_TOTAL.inc();
                tracing::debug!(attempt = attempt, "Room id collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Internal(format!(
        "No free room id after {} attempts",
        config.max_id_attempts
    )))
}

/// POST /create-room
#[tracing::instrument(name = "http.create_room", skip(state))]
pub async fn create_room(
    State(state): State<AppState>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let room_id = create_unique_room(state.store.as_ref(), &state.settings.rooms).await?;
    Ok(Json(CreateRoomResponse { room_id }))
}

/// POST /join-room
///
/// Advisory only: admission on the signaling endpoint is authoritative.
#[tracing::instrument(name = "http.join_room", skip_all)]
pub async fn join_room(
    State(state): State<AppState>,
    body: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    if request.room_id.is_empty() {
        return Err(AppError::Validation("roomId is required".to_string()));
    }
    if !is_valid_room_id(&request.room_id) {
        return Err(AppError::Validation("Invalid roomId".to_string()));
    }

    let room = state.store.get(&request.room_id).await?;
    if room.exists && room.count < ROOM_CAPACITY {
        Ok(Json(JoinRoomResponse {
            status: "joined".to_string(),
        }))
    } else {
        Err(AppError::NotFound("Room not found or full".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCapacityStore, Reservation, ReleaseOutcome, RoomRecord, RoomState};
    use crate::store::CapacityStoreStats;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_generated_ids_are_alphanumeric() {
        let id = generate_room_id(8);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(is_valid_room_id(&id));
        assert_ne!(generate_room_id(8), generate_room_id(8));
    }

    #[tokio::test]
    async fn test_create_unique_room() {
        let store = MemoryCapacityStore::new();
        let id = create_unique_room(&store, &RoomsConfig::default()).await.unwrap();
        let state = store.get(&id).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.count, 0);
    }

    /// Store whose `create` always reports a collision.
    struct CollidingStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl CapacityStore for CollidingStore {
        fn backend_name(&self) -> &'static str {
            "colliding"
        }
        async fn create(&self, id: &str) -> Result<RoomRecord, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::DuplicateRoom(id.to_string()))
        }
        async fn reserve(&self, id: &str) -> Result<Box<dyn Reservation>, StoreError> {
            Err(StoreError::RoomNotFound(id.to_string()))
        }
        async fn release(&self, _id: &str) -> Result<ReleaseOutcome, StoreError> {
            Ok(ReleaseOutcome::Missing)
        }
        async fn get(&self, _id: &str) -> Result<RoomState, StoreError> {
            Ok(RoomState::missing())
        }
        async fn sweep(&self, _older_than: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn stats(&self) -> CapacityStoreStats {
            CapacityStoreStats {
                backend: "colliding".to_string(),
                rooms: 0,
            }
        }
    }

    #[tokio::test]
    async fn test_create_gives_up_after_bounded_attempts() {
        let store = CollidingStore {
            attempts: AtomicU32::new(0),
        };
        let config = RoomsConfig {
            id_length: 8,
            max_id_attempts: 3,
        };

        let err = create_unique_room(&store, &config).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }
}
