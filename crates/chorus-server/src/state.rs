//! Shared application state.

use chorus_chat::Aggregator;
use chorus_core::ChorusConfig;
use chorus_store::SqliteStore;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: ChorusConfig,
    pub aggregator: Aggregator,
    pub store: SqliteStore,
}

impl AppState {
    pub fn new(config: ChorusConfig, aggregator: Aggregator, store: SqliteStore) -> Self {
        Self {
            config,
            aggregator,
            store,
        }
    }
}
