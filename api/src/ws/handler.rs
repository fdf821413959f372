use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use super::session;
use super::types::WsOut;
use crate::auth::{AuthError, extract_token};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws`: upgrades and authenticates a live session.
///
/// The token comes from `?token=` or the `Authorization` header. A missing or
/// invalid token still upgrades, but the socket only receives an error frame
/// followed by a close.
pub async fn ws_entry(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let auth = extract_token(query.token.as_deref(), &headers)
        .ok_or(AuthError::MissingToken)
        .and_then(|token| state.validator().validate(&token));

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user_id) => {
                let (sink, stream) = socket.split();
                session::serve(sink, stream, state, user_id).await;
            }
            Err(e) => reject(socket, e).await,
        }
    })
}

async fn reject(mut socket: WebSocket, err: AuthError) {
    tracing::info!(error = %err, "Rejecting unauthenticated session");
    let frame = WsOut::Error {
        code: "unauthorized",
        message: match err {
            AuthError::MissingToken => "Authentication required".to_string(),
            AuthError::InvalidToken(_) => "Invalid or expired token".to_string(),
        },
    };
    if let Some(payload) = frame.to_json() {
        let _ = socket.send(Message::Text(payload.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}
