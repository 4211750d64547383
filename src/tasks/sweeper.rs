use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::config::SweeperConfig;
use crate::metrics::ROOMS_SWEPT_TOTAL;
use crate::store::CapacityStore;

/// Background task that reclaims rooms created but never joined.
pub struct SweeperTask {
    config: SweeperConfig,
    store: Arc<dyn CapacityStore>,
    shutdown: broadcast::Receiver<()>,
}

impl SweeperTask {
    pub fn new(
        config: SweeperConfig,
        store: Arc<dyn CapacityStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            store,
            shutdown,
        }
    }

    /// Run until shutdown. The first sweep happens one interval after start.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_seconds,
            grace_period_secs = self.config.grace_period_seconds,
            backend = self.store.backend_name(),
            "Room sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Room sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        tracing::info!("Room sweeper stopped");
    }

    /// Delete rooms with no admitted peers older than the grace period.
    /// Failures are logged and retried on the next tick.
    pub async fn sweep_once(&self) -> u64 {
        let grace = chrono::Duration::seconds(self.config.grace_period_seconds as i64);
        let cutoff = Utc::now() - grace;

        match self.store.sweep(cutoff).await {
            Ok(0) => {
                tracing::debug!("Sweep found no stale rooms");
                0
            }
            Ok(removed) => {
                ROOMS_SWEPT_TOTAL.inc_by(removed);
                tracing::info!(removed = removed, cutoff = %cutoff, "Swept stale rooms");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Room sweep failed, retrying next interval");
                0
            }
        }
    }
}
