//! One admitted peer's connection: an inbound pump, an outbound pump and a
//! teardown that runs exactly once, whichever side ends first.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, OnceCell};
use tracing::Instrument;
use uuid::Uuid;

use crate::admission::Admitted;
use crate::metrics::SessionMetrics;
use crate::registry::{RelayFrame, RoomRegistry, SessionHandle};
use crate::store::{CapacityStore, ReleaseOutcome};

/// Convert a relay frame into a transport message of the same kind.
pub fn to_message(frame: RelayFrame) -> Message {
    match frame {
        RelayFrame::Text(text) => Message::Text(text.into()),
        RelayFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Convert an inbound transport message into a relay frame.
/// Control frames are not relayed.
pub fn to_frame(message: &Message) -> Option<RelayFrame> {
    match message {
        Message::Text(text) => Some(RelayFrame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(RelayFrame::Binary(bytes.to_vec())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Teardown guard shared by both pumps.
struct Teardown {
    room_id: String,
    session_id: Uuid,
    registry: Arc<RoomRegistry>,
    store: Arc<dyn CapacityStore>,
    opened_at: Instant,
    done: OnceCell<&'static str>,
}

impl Teardown {
    /// Remove the session and release its slot. Later callers wait for the
    /// first run and then return without doing anything.
    async fn run(&self, cause: &'static str) -> &'static str {
        *self
            .done
            .get_or_init(|| async move {
                self.registry.remove_session(&self.room_id, self.session_id);

                match self.store.release(&self.room_id).await {
                    Ok(ReleaseOutcome::Decremented { remaining }) => {
                        tracing::debug!(remaining = remaining, "Slot released");
                    }
                    Ok(ReleaseOutcome::Deleted) => {
                        tracing::debug!("Last slot released, room deleted");
                    }
                    Ok(ReleaseOutcome::Missing) => {
                        tracing::debug!("Room already gone at release");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to release slot");
                    }
                }

                let duration = self.opened_at.elapsed();
                SessionMetrics::record_closed(duration);
                tracing::info!(
                    cause = cause,
                    duration_ms = duration.as_millis() as u64,
                    "Signaling session closed"
                );
                cause
            })
            .await
    }
}

pub struct ConnectionSession {
    handle: Arc<SessionHandle>,
    outbound: mpsc::Receiver<RelayFrame>,
    registry: Arc<RoomRegistry>,
    store: Arc<dyn CapacityStore>,
    shutdown: broadcast::Receiver<()>,
}

impl ConnectionSession {
    pub fn new(
        admitted: Admitted,
        registry: Arc<RoomRegistry>,
        store: Arc<dyn CapacityStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            handle: admitted.session,
            outbound: admitted.outbound,
            registry,
            store,
            shutdown,
        }
    }

    /// Drive the session until either pump ends or the server shuts down.
    /// Returns the cause recorded by the teardown.
    #[tracing::instrument(
        name = "ws.session",
        skip_all,
        fields(room_id = %self.handle.room_id, session_id = %self.handle.id)
    )]
    pub async fn run<W, R, E>(self, sink: W, stream: R) -> &'static str
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let Self {
            handle,
            outbound,
            registry,
            store,
            mut shutdown,
        } = self;

        SessionMetrics::record_opened();
        tracing::info!("Signaling session started");

        let teardown = Arc::new(Teardown {
            room_id: handle.room_id.clone(),
            session_id: handle.id,
            registry: registry.clone(),
            store,
            opened_at: Instant::now(),
            done: OnceCell::new(),
        });

        // Pump events and a pump-driven teardown log under this session's span
        let mut outbound_task = tokio::spawn(
            outbound_pump(sink, outbound, teardown.clone()).instrument(tracing::Span::current()),
        );
        let mut inbound_task = tokio::spawn(
            inbound_pump(stream, handle.clone(), registry, teardown.clone())
                .instrument(tracing::Span::current()),
        );

        let cause = tokio::select! {
            _ = &mut inbound_task => "read side closed",
            _ = &mut outbound_task => "write side closed",
            _ = shutdown.recv() => "server shutdown",
        };

        let cause = teardown.run(cause).await;
        inbound_task.abort();
        outbound_task.abort();
        cause
    }
}

async fn inbound_pump<R, E>(
    mut stream: R,
    handle: Arc<SessionHandle>,
    registry: Arc<RoomRegistry>,
    teardown: Arc<Teardown>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display + Send,
{
    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Transport read failed");
                break;
            }
        };

        if let Message::Close(frame) = &message {
            tracing::debug!(
                code = frame.as_ref().map(|f| f.code),
                "Peer sent close frame"
            );
            break;
        }

        if let Some(frame) = to_frame(&message) {
            let outcome = registry.broadcast(&handle.room_id, handle.id, &frame);
            if outcome.dropped > 0 {
                tracing::debug!(dropped = outcome.dropped, "Relay dropped for slow peer");
            }
        }
    }

    teardown.run("read side closed").await;
}

async fn outbound_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<RelayFrame>,
    teardown: Arc<Teardown>,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(to_message(frame)).await {
            tracing::debug!(error = %e, "Transport write failed");
            break;
        }
    }

    let _ = sink.close().await;
    teardown.run("write side closed").await;
}
