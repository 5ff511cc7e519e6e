//! Presence: online/offline/last-seen derived purely from registry
//! membership. Nothing is persisted while a user is online; last-seen is
//! written once on disconnect or eviction.

use serde::Serialize;

use crate::db::DbPool;
use crate::state::AppState;
use crate::store::StoreError;
use crate::ws::ConnectionRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct PresenceRecord {
    pub user_id: i64,
    pub online: bool,
    pub last_seen_at: Option<String>,
}

/// True iff a live connection handle for the user exists in the registry.
pub fn is_online(registry: &ConnectionRegistry, user_id: i64) -> bool {
    registry.lookup(user_id).is_some()
}

/// Stamp the user's last-seen time. Called on disconnect and eviction only;
/// failures are logged, never propagated — presence must not block teardown.
pub async fn record_last_seen(db: &DbPool, user_id: i64) {
    let db = db.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
            rusqlite::params![user_id, now],
        )
        .map_err(StoreError::from)
    })
    .await;

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => tracing::warn!(user_id, error = %err, "failed to record last-seen"),
        Err(err) => tracing::warn!(user_id, error = %err, "last-seen task failed"),
    }
}

/// Current presence for a user: online from the registry, last-seen from
/// the users table when offline.
pub async fn presence_of(state: &AppState, user_id: i64) -> Result<PresenceRecord, StoreError> {
    if is_online(&state.registry, user_id) {
        return Ok(PresenceRecord {
            user_id,
            online: true,
            last_seen_at: None,
        });
    }

    let last_seen_at = state
        .users
        .get(user_id)
        .await?
        .and_then(|user| user.last_seen_at);

    Ok(PresenceRecord {
        user_id,
        online: false,
        last_seen_at,
    })
}
