use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::admission::AdmissionController;
use crate::config::Settings;
use crate::postgres::PostgresPool;
use crate::registry::RoomRegistry;
use crate::store::CapacityStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn CapacityStore>,
    pub registry: Arc<RoomRegistry>,
    pub admission: Arc<AdmissionController>,
    /// Present only with the postgres backend
    pub postgres_pool: Option<Arc<PostgresPool>>,
    /// Fired once on process shutdown; sessions and background tasks subscribe
    pub shutdown: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn CapacityStore>,
        postgres_pool: Option<Arc<PostgresPool>>,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let admission = Arc::new(AdmissionController::new(
            store.clone(),
            registry.clone(),
            settings.session.outbound_queue_capacity,
        ));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            store,
            registry,
            admission,
            postgres_pool,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// State backed by the in-memory capacity store.
    pub fn in_memory(settings: Settings) -> Self {
        let store: Arc<dyn CapacityStore> = Arc::new(crate::store::MemoryCapacityStore::new());
        Self::new(settings, store, None)
    }
}
