//! Fan-out router: the decision procedure between live push and durable
//! notification for an outbound event.
//!
//! Every `new_message` event ends as either a delivered frame or a written
//! notification, never neither. Typing indicators are the declared
//! exception: ephemeral, dropped when the receiver is not live. Sink write
//! failures are counted and logged, not retried — delivery stays
//! at-most-once best-effort.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::db::models::{Message, NotificationKind, User};
use crate::state::AppState;
use crate::ws::protocol::ServerFrame;

/// Events dropped because the notification sink itself failed.
static DROPPED_EVENTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Pushed onto a live connection's send queue.
    Delivered,
    /// Receiver unreachable; a durable notification was written instead.
    Queued,
}

/// Push a frame to a user's live connection, if any. A closed handle or a
/// full send queue counts as a failed push.
fn deliver(state: &AppState, target_user_id: i64, frame: &ServerFrame) -> bool {
    match state.registry.lookup(target_user_id) {
        Some(handle) => handle.push_frame(frame).is_ok(),
        None => false,
    }
}

/// Route a freshly persisted message to its receiver: live push when
/// possible, durable notification otherwise.
pub async fn route_new_message(state: &AppState, message: &Message, sender: &User) -> RouteOutcome {
    let frame = ServerFrame::NewMessage {
        message: message.clone(),
        sender: sender.clone(),
    };

    if deliver(state, message.receiver_id, &frame) {
        return RouteOutcome::Delivered;
    }

    let content = format!("New message from {}", sender.display_name);
    queue(state, message.receiver_id, NotificationKind::Message, &content).await;
    RouteOutcome::Queued
}

/// Relay a typing indicator if the receiver is live; silently dropped
/// otherwise — not worth a notification.
pub fn route_typing(state: &AppState, receiver_id: i64, sender_id: i64) {
    let _ = deliver(state, receiver_id, &ServerFrame::Typing { sender_id });
}

/// Entry point for collaborators outside the messaging path (the match
/// flow, system announcements): reach a live user directly, or leave a
/// durable notification.
pub async fn push_notification(
    state: &AppState,
    user_id: i64,
    kind: NotificationKind,
    content: &str,
) -> RouteOutcome {
    let frame = ServerFrame::Notification {
        kind,
        content: content.to_string(),
    };

    if deliver(state, user_id, &frame) {
        return RouteOutcome::Delivered;
    }

    queue(state, user_id, kind, content).await;
    RouteOutcome::Queued
}

async fn queue(state: &AppState, user_id: i64, kind: NotificationKind, content: &str) {
    if let Err(err) = state.notifications.write(user_id, kind, content).await {
        let dropped = DROPPED_EVENTS.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            user_id,
            kind = kind.as_str(),
            error = %err,
            dropped_total = dropped,
            "notification write failed, event dropped"
        );
    }
}

/// Total events dropped on sink failure since process start.
pub fn dropped_events() -> u64 {
    DROPPED_EVENTS.load(Ordering::Relaxed)
}
