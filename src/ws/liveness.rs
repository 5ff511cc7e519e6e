//! Liveness supervisor: a periodic sweep over the registry snapshot that
//! probes every connection and evicts the ones that stopped answering.
//!
//! The rule is two-cycle: a sweep sends a ping and arms the handle's
//! liveness flag; a pong (handled by the connection's actor) re-confirms
//! it. A handle still unconfirmed at the next sweep is evicted — removed
//! from the registry, its last-seen recorded, its transport closed. The
//! supervisor never reaches into a connection's internals; it sees only
//! the snapshot and the handles' flags.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::presence;
use crate::state::AppState;
use crate::ws::CLOSE_LIVENESS_TIMEOUT;

/// Spawn the supervisor task. The period is independent of any
/// connection's traffic.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.heartbeat_interval_secs);

    tokio::spawn(async move {
        let mut timer = interval(period);
        // Skip the first immediate tick
        timer.tick().await;

        loop {
            timer.tick().await;
            let evicted = sweep(&state).await;
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), users = ?evicted, "evicted dead connections");
            }
        }
    })
}

/// One supervisor cycle. Returns the user ids evicted this cycle.
pub async fn sweep(state: &AppState) -> Vec<i64> {
    let mut evicted = Vec::new();

    for handle in state.registry.snapshot() {
        if handle.take_liveness() {
            // Confirmed since the previous probe — probe again. A failed
            // ping leaves the flag unarmed, so the next cycle evicts.
            let _ = handle.send_raw(Message::Ping(Vec::new().into()));
            continue;
        }

        // No pong between the previous probe and now.
        if state.registry.remove(handle.user_id(), &handle) {
            handle.close(CLOSE_LIVENESS_TIMEOUT, "liveness timeout");
            // Skip the last-seen stamp if a reconnect raced the eviction —
            // presence is never written while the user is online.
            if state.registry.lookup(handle.user_id()).is_none() {
                presence::record_last_seen(&state.db, handle.user_id()).await;
            }
            evicted.push(handle.user_id());
        }
    }

    evicted
}
