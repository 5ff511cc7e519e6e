//! Connection registry: the single source of truth for "is user X
//! currently reachable".
//!
//! At most one live handle exists per user id. Registering a new handle for
//! a user atomically displaces the old one (last-connection-wins); removal
//! is compare-and-delete on the handle's generation counter, so a slow
//! teardown of an old connection can never evict a fresher one.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::ws::protocol::ServerFrame;
use crate::ws::CLOSE_SUPERSEDED;

/// Generation counter for connection handles. Monotonic across the process;
/// two handles never share an id.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A push that could not be handed to the connection's writer task.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("send queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,

    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One live transport session. Owned exclusively by the registry; the
/// protocol engine and the supervisor hold non-owning Arc clones.
pub struct ConnectionHandle {
    user_id: i64,
    conn_id: u64,
    tx: mpsc::Sender<Message>,
    /// Cleared by each liveness probe, set again by the next pong.
    alive: AtomicBool,
    /// Unix millis of the last pong, for diagnostics.
    last_pong_ms: AtomicI64,
    /// Signalled to make the owning actor stop reading and tear down.
    shutdown: Notify,
}

impl ConnectionHandle {
    pub fn new(user_id: i64, tx: mpsc::Sender<Message>) -> Self {
        Self {
            user_id,
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            alive: AtomicBool::new(true),
            last_pong_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            shutdown: Notify::new(),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Encode a frame and hand it to the writer task. The channel is
    /// bounded; a full queue is a failed push, visible to the caller.
    pub fn push_frame(&self, frame: &ServerFrame) -> Result<(), PushError> {
        let text = serde_json::to_string(frame)?;
        self.tx
            .try_send(Message::Text(text.into()))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => PushError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PushError::Closed,
            })
    }

    /// Best-effort raw transport message (ping, pong, close).
    pub fn send_raw(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Record a pong: the connection answered the last probe.
    pub fn confirm_alive(&self) {
        self.alive.store(true, Ordering::Release);
        self.last_pong_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Consume the liveness confirmation: returns whether the connection
    /// responded since the previous probe, and arms the next one.
    pub fn take_liveness(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn last_pong_ms(&self) -> i64 {
        self.last_pong_ms.load(Ordering::Relaxed)
    }

    /// True once the writer side is gone and nothing can be delivered.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a close frame (best effort) and signal the owning actor to
    /// stop. Safe to call more than once.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
        self.shutdown.notify_one();
    }

    /// Resolves when `close` has been called on this handle.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("user_id", &self.user_id)
            .field("conn_id", &self.conn_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// In-memory map from user id to its single live connection handle.
/// Per-key atomicity comes from DashMap's sharded locking; no global lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: DashMap<i64, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, displacing and closing any previous one for the
    /// same user. The swap is atomic: no instant exists where two handles
    /// for one user are both reachable through the registry.
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let user_id = handle.user_id();
        let conn_id = handle.conn_id();
        if let Some(old) = self.inner.insert(user_id, handle) {
            if old.conn_id() != conn_id {
                tracing::debug!(
                    user_id,
                    old_conn = old.conn_id(),
                    new_conn = conn_id,
                    "connection superseded"
                );
                old.close(CLOSE_SUPERSEDED, "superseded by a newer connection");
            }
        }
    }

    /// Non-blocking lookup. A handle whose channel is already closed is
    /// treated as absent and lazily removed.
    pub fn lookup(&self, user_id: i64) -> Option<Arc<ConnectionHandle>> {
        let handle = self.inner.get(&user_id).map(|entry| entry.value().clone())?;
        if handle.is_closed() {
            self.remove(user_id, &handle);
            return None;
        }
        Some(handle)
    }

    /// Compare-and-delete: removes the entry only if it still points at
    /// this exact handle. Returns whether this call won the removal.
    pub fn remove(&self, user_id: i64, handle: &ConnectionHandle) -> bool {
        self.inner
            .remove_if(&user_id, |_, current| current.conn_id() == handle.conn_id())
            .is_some()
    }

    /// Point-in-time view of all live handles, for the liveness supervisor.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(user_id: i64) -> (Arc<ConnectionHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ConnectionHandle::new(user_id, tx)), rx)
    }

    #[tokio::test]
    async fn register_displaces_and_closes_old_handle() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = handle(1);
        let (second, _second_rx) = handle(1);

        registry.register(first.clone());
        registry.register(second.clone());

        assert_eq!(registry.len(), 1);
        let current = registry.lookup(1).unwrap();
        assert_eq!(current.conn_id(), second.conn_id());

        // The displaced handle got a close frame and a shutdown signal.
        match first_rx.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_SUPERSEDED),
            other => panic!("expected close frame, got {:?}", other),
        }
        tokio::time::timeout(Duration::from_millis(100), first.closed())
            .await
            .expect("shutdown signalled");
    }

    #[tokio::test]
    async fn remove_is_compare_and_delete() {
        let registry = ConnectionRegistry::new();
        let (stale, _stale_rx) = handle(1);
        let (fresh, _fresh_rx) = handle(1);

        registry.register(stale.clone());
        registry.register(fresh.clone());

        // The stale handle's slow teardown must not evict the fresh one.
        assert!(!registry.remove(1, &stale));
        assert!(registry.lookup(1).is_some());

        assert!(registry.remove(1, &fresh));
        assert!(registry.lookup(1).is_none());
    }

    #[tokio::test]
    async fn lookup_treats_closed_handle_as_absent() {
        let registry = ConnectionRegistry::new();
        let (h, rx) = handle(1);
        registry.register(h);

        // Dropping the receiver closes the channel — the handle is dead
        // even though nothing removed it yet.
        drop(rx);

        assert!(registry.lookup(1).is_none());
        // Lazy removal released the slot.
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn connect_storm_leaves_one_live_handle() {
        let registry = Arc::new(ConnectionRegistry::new());

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(8);
                let h = Arc::new(ConnectionHandle::new(7, tx));
                registry.register(h.clone());
                (h, rx)
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        let survivor = registry.lookup(7).expect("one handle survives");

        // Every other handle was told to shut down.
        let mut superseded = 0;
        for (h, _rx) in &handles {
            if h.conn_id() != survivor.conn_id() {
                tokio::time::timeout(Duration::from_millis(200), h.closed())
                    .await
                    .expect("superseded handle signalled");
                superseded += 1;
            }
        }
        assert_eq!(superseded, handles.len() - 1);
    }

    #[tokio::test]
    async fn push_frame_reports_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let h = ConnectionHandle::new(1, tx);

        let frame = ServerFrame::UnreadCount { count: 0 };
        assert!(h.push_frame(&frame).is_ok());
        // Queue of one is now full and nobody is draining it.
        assert!(matches!(h.push_frame(&frame), Err(PushError::QueueFull)));
    }
}
