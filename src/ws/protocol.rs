//! Wire protocol: closed tagged frame types and per-frame dispatch.
//!
//! Frames are JSON text messages, internally tagged on `"type"`. Every
//! inbound frame is validated against the authenticated sender identity
//! before any side effect. Protocol violations terminate the connection;
//! store failures are recovered here and never crash the engine loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{Message, NotificationKind, User};
use crate::state::AppState;
use crate::ws::fanout;
use crate::ws::registry::ConnectionHandle;

/// Frames a client may send while the connection is active.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Send { receiver_id: i64, content: String },
    Typing { receiver_id: i64 },
    Read { message_id: i64 },
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Ack to the sender, carrying the durable message.
    MessageSent { message: Message },
    /// Pushed to the receiver of a freshly persisted message.
    NewMessage { message: Message, sender: User },
    /// Ephemeral typing indicator, relayed only to a live receiver.
    Typing { sender_id: i64 },
    /// Read receipt, pushed to the original sender if live.
    MessageRead { message_id: i64 },
    /// Generic push used by any producer, including the match flow.
    Notification {
        kind: NotificationKind,
        content: String,
    },
    /// Sent once, immediately after registration.
    UnreadCount { count: i64 },
}

/// A semantically or syntactically invalid frame. All variants terminate
/// the connection; the client reconnects and resubmits.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message content is empty")]
    EmptyContent,

    #[error("message addressed to self")]
    SelfAddressed,

    #[error("unknown receiver {0}")]
    UnknownReceiver(i64),

    #[error("unknown message {0}")]
    UnknownMessage(i64),

    #[error("message {0} is not addressed to the caller")]
    NotAddressee(i64),
}

/// Parse and dispatch one inbound text frame from `handle`'s user.
pub async fn handle_frame(
    state: &AppState,
    handle: &ConnectionHandle,
    raw: &str,
) -> Result<(), ProtocolError> {
    let frame: ClientFrame = serde_json::from_str(raw)?;
    let sender_id = handle.user_id();

    match frame {
        ClientFrame::Send {
            receiver_id,
            content,
        } => handle_send(state, handle, sender_id, receiver_id, &content).await,
        ClientFrame::Typing { receiver_id } => {
            handle_typing(state, sender_id, receiver_id).await
        }
        ClientFrame::Read { message_id } => {
            handle_read(state, sender_id, message_id).await
        }
    }
}

/// `send`: validate, persist, fan out to the receiver, ack the sender.
/// The append happens before any push so the ack always implies a durable
/// message.
async fn handle_send(
    state: &AppState,
    handle: &ConnectionHandle,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
) -> Result<(), ProtocolError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ProtocolError::EmptyContent);
    }
    if receiver_id == sender_id {
        return Err(ProtocolError::SelfAddressed);
    }

    let sender = match state.users.get(sender_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            // Authenticated id no longer resolves — account deleted
            // mid-session. Nothing sensible to relay.
            tracing::warn!(sender_id, "sender row missing, dropping send frame");
            return Ok(());
        }
        Err(err) => {
            tracing::warn!(sender_id, error = %err, "sender lookup failed");
            return Ok(());
        }
    };

    match state.users.exists(receiver_id).await {
        Ok(true) => {}
        Ok(false) => return Err(ProtocolError::UnknownReceiver(receiver_id)),
        Err(err) => {
            tracing::warn!(receiver_id, error = %err, "receiver lookup failed");
            return Ok(());
        }
    }

    let message = match state.messages.append(sender_id, receiver_id, content).await {
        Ok(message) => message,
        Err(err) => {
            // No ack: the sender must assume non-delivery.
            tracing::warn!(sender_id, receiver_id, error = %err, "message append failed");
            return Ok(());
        }
    };

    let outcome = fanout::route_new_message(state, &message, &sender).await;
    tracing::debug!(
        message_id = message.id,
        receiver_id,
        outcome = ?outcome,
        "message routed"
    );

    if handle
        .push_frame(&ServerFrame::MessageSent { message })
        .is_err()
    {
        tracing::debug!(sender_id, "sender gone before ack");
    }

    Ok(())
}

/// `typing`: ephemeral, relayed only to a live receiver, never queued.
async fn handle_typing(
    state: &AppState,
    sender_id: i64,
    receiver_id: i64,
) -> Result<(), ProtocolError> {
    match state.users.exists(receiver_id).await {
        Ok(true) => {}
        Ok(false) => return Err(ProtocolError::UnknownReceiver(receiver_id)),
        Err(err) => {
            tracing::warn!(receiver_id, error = %err, "receiver lookup failed");
            return Ok(());
        }
    }

    fanout::route_typing(state, receiver_id, sender_id);
    Ok(())
}

/// `read`: mark the message read (idempotent) and push a receipt to the
/// original sender if live. Read receipts are best-effort and never become
/// notifications — read state is queryable on the next fetch.
async fn handle_read(
    state: &AppState,
    caller_id: i64,
    message_id: i64,
) -> Result<(), ProtocolError> {
    let message = match state.messages.get(message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => return Err(ProtocolError::UnknownMessage(message_id)),
        Err(err) => {
            tracing::warn!(message_id, error = %err, "message lookup failed");
            return Ok(());
        }
    };

    if message.receiver_id != caller_id {
        return Err(ProtocolError::NotAddressee(message_id));
    }

    if let Err(err) = state.messages.mark_read(message_id).await {
        tracing::warn!(message_id, error = %err, "read marking failed");
        return Ok(());
    }

    if let Some(sender_handle) = state.registry.lookup(message.sender_id) {
        let _ = sender_handle.push_frame(&ServerFrame::MessageRead { message_id });
    }

    Ok(())
}
