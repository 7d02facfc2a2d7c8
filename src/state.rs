use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::models::location::LocationDelta;
use crate::observability::metrics::Metrics;
use crate::store::memory::MemStore;
use crate::store::{DispatchStore, LedgerStore, LocationStore};

pub struct AppState {
    pub dispatch: Arc<dyn DispatchStore>,
    pub locations: Arc<dyn LocationStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub location_events_tx: broadcast::Sender<LocationDelta>,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemStore::new());
        let (location_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Self {
            dispatch: store.clone(),
            locations: store.clone(),
            ledger: store,
            location_events_tx,
            metrics: Metrics::new(),
            config,
        }
    }
}
