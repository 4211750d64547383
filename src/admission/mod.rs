//! Admission controller: binds a durable capacity reservation to a live
//! registry entry.
//!
//! Every attempt moves `Reserving -> Upgrading -> Committed | RolledBack`.
//! The reservation is taken before the transport upgrade and committed only
//! after the upgrade succeeds; the session is registered only after the
//! commit. A failed or abandoned upgrade rolls the reservation back, so a
//! slot is never stranded and the registry never holds an uncommitted peer.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::metrics::AdmissionMetrics;
use crate::registry::{RegistryError, RelayFrame, RoomRegistry, SessionHandle};
use crate::store::{CapacityStore, Reservation, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Reserving,
    Upgrading,
    Committed,
    RolledBack,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Transport handshake failed; room state is unchanged
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound(id) => AdmissionError::RoomNotFound(id),
            StoreError::RoomFull(id) => AdmissionError::RoomFull(id),
            other => AdmissionError::StoreUnavailable(other.to_string()),
        }
    }
}

/// A committed, registered peer.
pub struct Admitted {
    pub session: Arc<SessionHandle>,
    /// Receiving half of the session's outbound queue
    pub outbound: mpsc::Receiver<RelayFrame>,
    /// Durable admitted count after this peer
    pub admitted_count: i32,
    /// This peer completed the pair
    pub ready: bool,
}

pub struct AdmissionController {
    store: Arc<dyn CapacityStore>,
    registry: Arc<RoomRegistry>,
    queue_capacity: usize,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn CapacityStore>,
        registry: Arc<RoomRegistry>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            store,
            registry,
            queue_capacity,
        }
    }

    /// Reserve a slot in `room_id`. The returned admission holds the
    /// reservation open while the caller performs the transport upgrade.
    #[tracing::instrument(name = "admission.reserve", skip(self))]
    pub async fn begin(&self, room_id: &str) -> Result<PendingAdmission, AdmissionError> {
        let mut pending = PendingAdmission::new(self, room_id);
        if let Err(err) = pending.reserve().await {
            match &err {
                AdmissionError::RoomNotFound(_) => {
                    AdmissionMetrics::record_room_not_found();
                    tracing::info!("Connection refused: room does not exist");
                }
                AdmissionError::RoomFull(_) => {
                    AdmissionMetrics::record_room_full();
                    tracing::info!("Connection refused: room is full");
                }
                _ => {
                    AdmissionMetrics::record_store_unavailable();
                    tracing::error!(error = %err, "Reservation failed");
                }
            }
            return Err(err);
        }
        Ok(pending)
    }

    /// Run the whole protocol around an upgrade step.
    pub async fn admit<F, Fut, T, E>(
        &self,
        room_id: &str,
        upgrade: F,
    ) -> Result<(Admitted, T), AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let pending = self.begin(room_id).await?;
        match upgrade().await {
            Ok(transport) => Ok((pending.commit().await?, transport)),
            Err(e) => Err(pending.abort(&e.to_string()).await),
        }
    }
}

/// An admission between reservation and commit.
///
/// Dropping it without calling `commit` or `abort` rolls the reservation back.
pub struct PendingAdmission {
    room_id: String,
    reservation: Option<Box<dyn Reservation>>,
    store: Arc<dyn CapacityStore>,
    registry: Arc<RoomRegistry>,
    queue_capacity: usize,
    state: AdmissionState,
}

impl PendingAdmission {
    fn new(controller: &AdmissionController, room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            reservation: None,
            store: controller.store.clone(),
            registry: controller.registry.clone(),
            queue_capacity: controller.queue_capacity,
            state: AdmissionState::Reserving,
        }
    }

    /// Take the row lock. On error nothing is held and the state stays `Reserving`.
    async fn reserve(&mut self) -> Result<(), AdmissionError> {
        let reservation = self.store.reserve(&self.room_id).await?;
        tracing::debug!(admitted = reservation.admitted(), "Slot reserved, upgrading");
        self.reservation = Some(reservation);
        self.state = AdmissionState::Upgrading;
        Ok(())
    }

    pub fn state(&self) -> AdmissionState {
        self.state
    }

    /// Upgrade succeeded: commit the slot, then register the session.
    #[tracing::instrument(name = "admission.commit", skip(self), fields(room_id = %self.room_id))]
    pub async fn commit(mut self) -> Result<Admitted, AdmissionError> {
        let Some(reservation) = self.reservation.take() else {
            return Err(AdmissionError::StoreUnavailable(
                "reservation already consumed".to_string(),
            ));
        };

        let admitted_count = match reservation.commit().await {
            Ok(count) => count,
            Err(e) => {
                self.state = AdmissionState::RolledBack;
                AdmissionMetrics::record_store_unavailable();
                tracing::error!(error = %e, "Failed to commit reservation");
                return Err(e.into());
            }
        };
        self.state = AdmissionState::Committed;

        let (session, outbound) = SessionHandle::new(self.room_id.clone(), self.queue_capacity);
        let ready = match self.registry.add_session(&self.room_id, session.clone()) {
            Ok(outcome) => outcome.ready,
            Err(RegistryError::RoomOccupied { sessions, .. }) => {
                // Durable count and live sessions disagree; give the slot back.
                tracing::warn!(
                    live_sessions = sessions,
                    "Live room already full after commit, releasing slot"
                );
                if let Err(e) = self.store.release(&self.room_id).await {
                    tracing::error!(error = %e, "Failed to release slot for rejected session");
                }
                AdmissionMetrics::record_room_full();
                return Err(AdmissionError::RoomFull(self.room_id.clone()));
            }
        };

        AdmissionMetrics::record_committed();
        tracing::info!(
            session_id = %session.id,
            admitted = admitted_count,
            ready = ready,
            "Peer admitted"
        );

        Ok(Admitted {
            session,
            outbound,
            admitted_count,
            ready,
        })
    }

    /// Upgrade failed: roll the reservation back.
    #[tracing::instrument(name = "admission.abort", skip(self), fields(room_id = %self.room_id))]
    pub async fn abort(mut self, reason: &str) -> AdmissionError {
        if let Some(reservation) = self.reservation.take() {
            if let Err(e) = reservation.rollback().await {
                tracing::warn!(error = %e, "Rollback reported an error");
            }
        }
        self.state = AdmissionState::RolledBack;
        AdmissionMetrics::record_upgrade_failed();
        tracing::info!(reason = %reason, "Upgrade failed, reservation rolled back");
        AdmissionError::UpgradeFailed(reason.to_string())
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        // Dropping the reservation itself performs the rollback.
        if self.reservation.take().is_some() {
            AdmissionMetrics::record_upgrade_failed();
            tracing::info!(
                room_id = %self.room_id,
                "Upgrade abandoned, reservation rolled back"
            );
        }
    }
}
