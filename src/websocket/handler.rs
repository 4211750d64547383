use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};

use crate::admission::PendingAdmission;
use crate::error::AppError;
use crate::server::AppState;

use super::session::ConnectionSession;

const MAX_ROOM_ID_LENGTH: usize = 64;

/// Room ids are opaque but must be non-empty, bounded and URL-safe.
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LENGTH
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// GET /ws/{room_id}
///
/// The slot is reserved before the handshake completes. A rejected or failed
/// upgrade rolls it back; a completed one commits it inside the upgrade task.
#[tracing::instrument(name = "ws.upgrade", skip_all, fields(room_id = %room_id))]
pub async fn ws_handler(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !is_valid_room_id(&room_id) {
        return AppError::Validation("Invalid room id".to_string()).into_response();
    }

    let pending = match state.admission.begin(&room_id).await {
        Ok(pending) => pending,
        Err(e) => return AppError::from(e).into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            pending.abort(&rejection.body_text()).await;
            return rejection.into_response();
        }
    };

    let failed_room = room_id.clone();
    ws.max_message_size(state.settings.session.max_message_bytes)
        .on_failed_upgrade(move |e| {
            // The dropped upgrade task rolls the reservation back.
            tracing::warn!(room_id = %failed_room, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, state, pending))
}

/// GET /ws/ with no room id
pub async fn ws_missing_room_handler() -> Response {
    AppError::Validation("Invalid room id".to_string()).into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, pending: PendingAdmission) {
    let admitted = match pending.commit().await {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::warn!(error = %e, "Admission failed after upgrade");
            let (mut ws_sender, _) = socket.split();
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: e.to_string().into(),
            };
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
            let _ = ws_sender.close().await;
            return;
        }
    };

    let session = ConnectionSession::new(
        admitted,
        state.registry.clone(),
        state.store.clone(),
        state.shutdown.subscribe(),
    );
    let (ws_sender, ws_receiver) = socket.split();
    session.run(ws_sender, ws_receiver).await;
}
