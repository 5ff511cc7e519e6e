//! Actor-per-connection: one reader loop plus one writer task for each
//! authenticated WebSocket.
//!
//! The writer task owns the sink half and drains the connection's bounded
//! channel; everything else in the process reaches this client only through
//! the registry's handle. The reader loop runs the protocol engine until a
//! close cause arrives, then tears down through `Closing` into the terminal
//! `Closed` phase. A connection's lifecycle:
//! Handshaking (upgrade handler) -> Active -> Closing -> Closed.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::presence;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerFrame};
use crate::ws::registry::ConnectionHandle;
use crate::ws::CLOSE_PROTOCOL_ERROR;

/// Why the engine left the `Active` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    /// Client sent a close frame or the stream ended.
    PeerClosed,
    /// Transport-level receive error.
    Transport,
    /// Malformed or semantically invalid frame.
    ProtocolError,
    /// Supervisor eviction or supersession by a newer connection.
    Evicted,
}

/// Run the engine for an authenticated connection until it closes.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.send_queue_capacity);

    let handle = Arc::new(ConnectionHandle::new(user_id, tx));

    // Handshaking -> Active: register, displacing any stale prior entry.
    state.registry.register(handle.clone());

    tracing::info!(user_id, conn_id = handle.conn_id(), "connection active");

    // Greeting: the unread count, sent once right after registration.
    match state.messages.count_unread(user_id).await {
        Ok(count) => {
            let _ = handle.push_frame(&ServerFrame::UnreadCount { count });
        }
        Err(err) => {
            tracing::warn!(user_id, error = %err, "unread count query failed");
        }
    }

    // Writer task: owns the sink, forwards messages from the bounded channel.
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Active: read frames until a close cause arrives. The shutdown signal
    // cancels only the pending read — a store write already started by a
    // dispatched frame runs to completion on the blocking pool.
    let cause = loop {
        tokio::select! {
            _ = handle.closed() => break CloseCause::Evicted,
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = protocol::handle_frame(&state, &handle, text.as_str()).await {
                        tracing::warn!(user_id, error = %err, "protocol error, closing connection");
                        let _ = handle.send_raw(Message::Close(Some(CloseFrame {
                            code: CLOSE_PROTOCOL_ERROR,
                            reason: "protocol error".into(),
                        })));
                        break CloseCause::ProtocolError;
                    }
                }
                Some(Ok(Message::Pong(_))) => handle.confirm_alive(),
                Some(Ok(Message::Ping(data))) => {
                    let _ = handle.send_raw(Message::Pong(data));
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(user_id, "ignoring binary frame on text protocol");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(user_id, reason = ?frame, "client initiated close");
                    break CloseCause::PeerClosed;
                }
                Some(Err(err)) => {
                    tracing::warn!(user_id, error = %err, "websocket receive error");
                    break CloseCause::Transport;
                }
                None => break CloseCause::PeerClosed,
            }
        }
    };

    // Closing: terminate the writer through its own channel so any queued
    // close frame (supersession, eviction, protocol error) reaches the peer
    // before the sink drops. The writer stops at the first close frame.
    let _ = handle.send_raw(Message::Close(None));
    if tokio::time::timeout(Duration::from_millis(500), &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }

    // Compare-and-delete — an eviction or a newer registration may already
    // have released the slot. Last-seen is recorded only when the user ends
    // up offline: a superseding connection keeps them online.
    let _ = state.registry.remove(user_id, &handle);
    if state.registry.lookup(user_id).is_none() {
        presence::record_last_seen(&state.db, user_id).await;
    }

    // Closed: terminal.
    tracing::info!(user_id, conn_id = handle.conn_id(), cause = ?cause, "connection closed");
}

/// Writer task: receives messages from the bounded channel and forwards
/// them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
        if is_close {
            break;
        }
    }
}
