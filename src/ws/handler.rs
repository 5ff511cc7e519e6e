use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::{CLOSE_TOKEN_EXPIRED, CLOSE_TOKEN_INVALID};

/// Query parameters for WebSocket connection. Auth is via query param
/// ?token=JWT — browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with the appropriate
/// close code; no registry entry is ever created for an invalid identity.
/// On success, spawns the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = jwt::validate_access_token(&state.jwt_secret, &params.token)
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                (CLOSE_TOKEN_EXPIRED, "Token expired")
            }
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        })
        .and_then(|claims| {
            claims
                .user_id()
                .ok_or((CLOSE_TOKEN_INVALID, "Token subject is not a user id"))
        });

    match user_id {
        Ok(user_id) => {
            tracing::info!(user_id, "websocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err((close_code, reason)) => {
            tracing::warn!(close_code, reason, "websocket auth failed");

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket: WebSocket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}
