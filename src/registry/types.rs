//! Session handle, relay frame and live room types

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sentinel sent to both peers once the room holds two sessions
pub const READY_PAYLOAD: &str = r#"{"status":"ready"}"#;

/// An opaque signaling payload, relayed with its original frame kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RelayFrame {
    pub fn ready() -> Self {
        RelayFrame::Text(READY_PAYLOAD.to_string())
    }

    pub fn len(&self) -> usize {
        match self {
            RelayFrame::Text(text) => text.len(),
            RelayFrame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry-side handle for one connected peer.
///
/// The connection session owns the receiving half of the outbound queue and
/// the transport; the registry only keeps this handle for lookup and fan-out.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub room_id: String,
    sender: mpsc::Sender<RelayFrame>,
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Create a handle and the bounded outbound queue it feeds.
    pub fn new(
        room_id: impl Into<String>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<RelayFrame>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            sender,
            connected_at: Utc::now(),
        });
        (handle, receiver)
    }

    /// Non-blocking enqueue. Returns false if the queue is full or closed.
    pub fn try_enqueue(&self, frame: RelayFrame) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}

#[derive(Debug, Default)]
pub(super) struct LiveRoomInner {
    pub sessions: Vec<Arc<SessionHandle>>,
    /// Set when the last session leaves; a closed room is never reused
    pub closed: bool,
}

/// Sessions currently connected to one room.
#[derive(Debug)]
pub struct LiveRoom {
    pub id: String,
    inner: Mutex<LiveRoomInner>,
}

impl LiveRoom {
    pub(super) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(LiveRoomInner::default()),
        }
    }

    /// Never held across an await point.
    pub(super) fn lock(&self) -> MutexGuard<'_, LiveRoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_enqueue_respects_capacity() {
        let (handle, _rx) = SessionHandle::new("room", 1);
        assert!(handle.try_enqueue(RelayFrame::Text("a".into())));
        assert!(!handle.try_enqueue(RelayFrame::Text("b".into())));
    }

    #[test]
    fn test_try_enqueue_fails_when_receiver_dropped() {
        let (handle, rx) = SessionHandle::new("room", 4);
        drop(rx);
        assert!(!handle.try_enqueue(RelayFrame::Binary(vec![1, 2, 3])));
    }

    #[test]
    fn test_ready_frame() {
        assert_eq!(RelayFrame::ready(), RelayFrame::Text(r#"{"status":"ready"}"#.into()));
        assert_eq!(RelayFrame::Binary(vec![0; 4]).len(), 4);
    }
}
