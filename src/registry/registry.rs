use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::ROOM_CAPACITY;
use crate::metrics::{RelayMetrics, LIVE_ROOMS, LIVE_SESSIONS};

use super::stats::RegistryStats;
use super::types::{LiveRoom, RelayFrame, SessionHandle};

/// Returned when a room already holds its full complement of sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Room {room_id} already has {sessions} live sessions")]
    RoomOccupied { room_id: String, sessions: usize },
}

/// Result of `add_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// Sessions in the room after the add
    pub sessions: usize,
    /// Whether this add completed the pair and fanned out `ready`
    pub ready: bool,
}

/// Result of `broadcast`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Maps room id to the sessions currently connected to it.
///
/// The map lock (a DashMap shard) is only held for lookup, insert and delete.
/// Each `LiveRoom` has its own mutex guarding its session list; it is held
/// only for list mutation and non-blocking enqueues.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<LiveRoom>>,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Return the live room for `id`, creating an empty one if absent.
    pub fn get_or_create(&self, id: &str) -> Arc<LiveRoom> {
        self.rooms
            .entry(id.to_string())
            .or_insert_with(|| {
                LIVE_ROOMS.inc();
                tracing::debug!(room_id = %id, "Live room created");
                Arc::new(LiveRoom::new(id))
            })
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<LiveRoom>> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Register a session. When it is the second one, `ready` is enqueued to
    /// both sessions before the room lock is released.
    pub fn add_session(
        &self,
        id: &str,
        session: Arc<SessionHandle>,
    ) -> Result<AddOutcome, RegistryError> {
        loop {
            let room = self.get_or_create(id);
            let mut inner = room.lock();

            // Lost a race with the last session leaving; that room is gone.
            if inner.closed {
                continue;
            }

            if inner.sessions.len() >= ROOM_CAPACITY as usize {
                return Err(RegistryError::RoomOccupied {
                    room_id: id.to_string(),
                    sessions: inner.sessions.len(),
                });
            }

            inner.sessions.push(session.clone());
            LIVE_SESSIONS.inc();

            let sessions = inner.sessions.len();
            let ready = sessions == ROOM_CAPACITY as usize;
            if ready {
                let mut notified = 0;
                for peer in &inner.sessions {
                    if peer.try_enqueue(RelayFrame::ready()) {
                        notified += 1;
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        RelayMetrics::record_dropped(1);
                        tracing::warn!(
                            room_id = %id,
                            session_id = %peer.id,
                            "Outbound queue full, ready notification dropped"
                        );
                    }
                }
                RelayMetrics::record_ready(notified);
                tracing::info!(room_id = %id, "Room ready with two peers");
            }

            tracing::debug!(
                room_id = %id,
                session_id = %session.id,
                sessions = sessions,
                "Session added to room"
            );

            return Ok(AddOutcome { sessions, ready });
        }
    }

    /// Deregister a session. Removing the last one deletes the live room in
    /// the same critical section. Returns false if the session was not found.
    pub fn remove_session(&self, id: &str, session_id: Uuid) -> bool {
        let Some(room) = self.get(id) else {
            return false;
        };

        let mut inner = room.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.id != session_id);
        let removed = inner.sessions.len() < before;

        if removed {
            LIVE_SESSIONS.dec();
        }

        if inner.sessions.is_empty() && !inner.closed {
            inner.closed = true;
            self.rooms
                .remove_if(id, |_, current| Arc::ptr_eq(current, &room));
            LIVE_ROOMS.dec();
            tracing::debug!(room_id = %id, "Live room removed");
        }

        removed
    }

    /// Enqueue `frame` to every session in the room except the sender.
    ///
    /// Never blocks: a full queue drops the frame for that peer only.
    pub fn broadcast(&self, id: &str, sender_id: Uuid, frame: &RelayFrame) -> BroadcastOutcome {
        let Some(room) = self.get(id) else {
            return BroadcastOutcome::default();
        };

        let mut outcome = BroadcastOutcome::default();
        let inner = room.lock();
        for peer in inner.sessions.iter().filter(|s| s.id != sender_id) {
            if peer.try_enqueue(frame.clone()) {
                outcome.delivered += 1;
            } else {
                outcome.dropped += 1;
                tracing::warn!(
                    room_id = %id,
                    session_id = %peer.id,
                    bytes = frame.len(),
                    "Outbound queue full, message dropped"
                );
            }
        }
        drop(inner);

        self.relayed
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        RelayMetrics::record_relayed(outcome.delivered as u64);
        if outcome.dropped > 0 {
            RelayMetrics::record_dropped(outcome.dropped as u64);
        }

        outcome
    }

    pub fn session_count(&self, id: &str) -> usize {
        self.get(id).map(|room| room.session_count()).unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<LiveRoom>> = self.rooms.iter().map(|r| r.value().clone()).collect();
        RegistryStats {
            live_rooms: rooms.len(),
            live_sessions: rooms.iter().map(|room| room.session_count()).sum(),
            messages_relayed: self.relayed.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn session(room: &str) -> (Arc<SessionHandle>, tokio::sync::mpsc::Receiver<RelayFrame>) {
        SessionHandle::new(room, 8)
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = RoomRegistry::new();
        let a = registry.get_or_create("r1");
        let b = registry.get_or_create("r1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_first_session_gets_no_ready() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = session("r1");

        let outcome = registry.add_session("r1", a).unwrap();
        assert_eq!(outcome, AddOutcome { sessions: 1, ready: false });
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_second_session_notifies_both_once() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = session("r1");
        let (b, mut rx_b) = session("r1");

        registry.add_session("r1", a).unwrap();
        let outcome = registry.add_session("r1", b).unwrap();
        assert!(outcome.ready);

        assert_eq!(rx_a.try_recv().unwrap(), RelayFrame::ready());
        assert_eq!(rx_b.try_recv().unwrap(), RelayFrame::ready());
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx_b.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_third_session_rejected() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = session("r1");
        let (b, _rx_b) = session("r1");
        let (c, _rx_c) = session("r1");

        registry.add_session("r1", a).unwrap();
        registry.add_session("r1", b).unwrap();
        let err = registry.add_session("r1", c).unwrap_err();
        assert_eq!(
            err,
            RegistryError::RoomOccupied { room_id: "r1".into(), sessions: 2 }
        );
        assert_eq!(registry.session_count("r1"), 2);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = session("r1");
        let (b, mut rx_b) = session("r1");
        let a_id = a.id;
        registry.add_session("r1", a).unwrap();
        registry.add_session("r1", b).unwrap();
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        let frame = RelayFrame::Text(r#"{"type":"offer","sdp":"v=0"}"#.into());
        let outcome = registry.broadcast("r1", a_id, &frame);

        assert_eq!(outcome, BroadcastOutcome { delivered: 1, dropped: 0 });
        assert_eq!(rx_b.try_recv().unwrap(), frame);
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_broadcast_drops_for_saturated_peer() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = SessionHandle::new("r1", 8);
        let (b, mut rx_b) = SessionHandle::new("r1", 1);
        let a_id = a.id;
        registry.add_session("r1", a).unwrap();
        // b's single slot is taken by the ready notification
        registry.add_session("r1", b).unwrap();

        let frame = RelayFrame::Binary(vec![1, 2, 3]);
        let outcome = registry.broadcast("r1", a_id, &frame);
        assert_eq!(outcome, BroadcastOutcome { delivered: 0, dropped: 1 });
        assert_eq!(registry.stats().messages_dropped, 1);

        // Queue still holds only the ready frame
        assert_eq!(rx_b.try_recv().unwrap(), RelayFrame::ready());
        assert_eq!(rx_b.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_saturated_peer_does_not_block_others() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = SessionHandle::new("r1", 8);
        let (b, _rx_b) = SessionHandle::new("r1", 1);
        let b_id = b.id;
        registry.add_session("r1", a).unwrap();
        registry.add_session("r1", b).unwrap();
        let _ = rx_a.try_recv();

        // b is saturated, but its own messages still reach a
        for i in 0..3 {
            let frame = RelayFrame::Text(format!("candidate-{i}"));
            assert_eq!(registry.broadcast("r1", b_id, &frame).delivered, 1);
        }
        for i in 0..3 {
            assert_eq!(rx_a.try_recv().unwrap(), RelayFrame::Text(format!("candidate-{i}")));
        }
    }

    #[test]
    fn test_broadcast_to_missing_room_is_noop() {
        let registry = RoomRegistry::new();
        let outcome = registry.broadcast("ghost", Uuid::new_v4(), &RelayFrame::Text("x".into()));
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[test]
    fn test_remove_last_session_deletes_room() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = session("r1");
        let a_id = a.id;
        registry.add_session("r1", a).unwrap();

        assert!(registry.remove_session("r1", a_id));
        assert!(registry.get("r1").is_none());
        assert_eq!(registry.stats().live_rooms, 0);
    }

    #[test]
    fn test_remove_unknown_session() {
        let registry = RoomRegistry::new();
        assert!(!registry.remove_session("r1", Uuid::new_v4()));
    }

    #[test]
    fn test_rejoin_after_last_leave_starts_fresh_room() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = session("r1");
        let a_id = a.id;
        registry.add_session("r1", a).unwrap();
        let old_room = registry.get("r1").unwrap();
        registry.remove_session("r1", a_id);

        let (b, mut rx_b) = session("r1");
        let outcome = registry.add_session("r1", b).unwrap();
        assert_eq!(outcome, AddOutcome { sessions: 1, ready: false });

        let new_room = registry.get("r1").unwrap();
        assert!(!Arc::ptr_eq(&old_room, &new_room));
        assert_eq!(old_room.session_count(), 0);
        assert_eq!(rx_b.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_closed_room_is_never_reused() {
        let registry = RoomRegistry::new();
        let stale = registry.get_or_create("r1");
        let (a, _rx_a) = session("r1");
        let a_id = a.id;
        registry.add_session("r1", a).unwrap();
        registry.remove_session("r1", a_id);

        // A joiner holding the stale Arc must land in a fresh room
        let (b, _rx_b) = session("r1");
        registry.add_session("r1", b).unwrap();
        assert_eq!(stale.session_count(), 0);
        assert_eq!(registry.session_count("r1"), 1);
    }

    #[test]
    fn test_stats() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = session("r1");
        let (b, _rx_b) = session("r2");
        registry.add_session("r1", a).unwrap();
        registry.add_session("r2", b).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.live_rooms, 2);
        assert_eq!(stats.live_sessions, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_leave_keeps_invariants() {
        let registry = Arc::new(RoomRegistry::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let (s, _rx) = SessionHandle::new("hot", 4);
                        let id = s.id;
                        if registry.add_session("hot", s).is_ok() {
                            tokio::task::yield_now().await;
                            assert!(registry.remove_session("hot", id));
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(registry.get("hot").is_none());
        assert_eq!(registry.stats().live_sessions, 0);
    }
}
