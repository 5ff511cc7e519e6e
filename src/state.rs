use std::sync::Arc;

use crate::db::DbPool;
use crate::store::{MessageStore, NotificationSink, UserStore};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT verification secret (256-bit random key, shared with the
    /// session-issuing service)
    pub jwt_secret: Vec<u8>,
    /// Live connections, one per user (last-connection-wins)
    pub registry: Arc<ConnectionRegistry>,
    /// Durable message log
    pub messages: MessageStore,
    /// Durable notification records
    pub notifications: NotificationSink,
    /// User identity lookups
    pub users: UserStore,
    /// Capacity of each connection's outbound send queue
    pub send_queue_capacity: usize,
    /// Liveness supervisor period in seconds
    pub heartbeat_interval_secs: u64,
}

impl AppState {
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        send_queue_capacity: usize,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Self {
            messages: MessageStore::new(db.clone()),
            notifications: NotificationSink::new(db.clone()),
            users: UserStore::new(db.clone()),
            db,
            jwt_secret,
            registry: Arc::new(ConnectionRegistry::new()),
            send_queue_capacity,
            heartbeat_interval_secs,
        }
    }
}
