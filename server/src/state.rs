use std::sync::Arc;
use std::time::Duration;

use crate::chat::router::DeliveryRouter;
use crate::db::DbPool;
use crate::notify::NotificationDispatcher;
use crate::store::{MessageStore, SqliteMessageStore};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
/// Everything here is an explicitly owned handle; cloning shares it.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live WebSocket connections grouped into per-user rooms
    pub connections: ConnectionRegistry,
    /// Validate → persist → deliver → notify pipeline for send_message events
    pub router: DeliveryRouter,
}

impl AppState {
    /// State backed by the SQLite message store on `db`.
    pub fn new(db: DbPool, notifier: NotificationDispatcher, persist_timeout: Duration) -> Self {
        let store = Arc::new(SqliteMessageStore::new(db.clone()));
        Self::with_store(db, store, notifier, persist_timeout)
    }

    /// State with a caller-supplied message store.
    pub fn with_store(
        db: DbPool,
        store: Arc<dyn MessageStore>,
        notifier: NotificationDispatcher,
        persist_timeout: Duration,
    ) -> Self {
        let connections = ConnectionRegistry::new();
        let router = DeliveryRouter::new(store, connections.clone(), notifier, persist_timeout);
        Self {
            db,
            connections,
            router,
        }
    }
}
