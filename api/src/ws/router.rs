//! Dispatch of decoded client frames.
//!
//! Frames acting on a chat the sender does not belong to, or carrying a
//! malformed chat id, are dropped without a reply.

use chrono::{DateTime, Utc};
use db::NewMessage;
use db::models::message::MessageType;
use std::str::FromStr;
use uuid::Uuid;

use super::connection::Connection;
use super::topics::chat_topic;
use super::types::{MessagePayload, WsIn, WsOut};
use crate::state::AppState;

pub async fn dispatch(state: &AppState, conn: &Connection, frame: WsIn, received_at: DateTime<Utc>) {
    match frame {
        WsIn::Message {
            chat_id,
            content,
            data,
        } => handle_message(state, conn, chat_id, content, data, received_at).await,
        WsIn::Typing { chat_id } => handle_typing(state, conn, chat_id).await,
        WsIn::Read { chat_id } => handle_read(state, conn, chat_id, received_at).await,
        WsIn::JoinChat { chat_id } => handle_join(state, conn, chat_id).await,
        WsIn::LeaveChat { chat_id } => handle_leave(state, conn, chat_id).await,
        WsIn::Ping => {
            if let Some(pong) = (WsOut::Pong {
                timestamp: received_at.timestamp(),
            })
            .to_json()
            {
                conn.enqueue(pong);
            }
        }
    }
}

fn parse_chat_id(raw: Option<String>) -> Option<Uuid> {
    raw.as_deref().and_then(|s| Uuid::parse_str(s.trim()).ok())
}

/// Membership check that treats lookup errors as "not a member".
async fn is_member(state: &AppState, chat_id: Uuid, user_id: Uuid) -> bool {
    match state.store().membership(chat_id, user_id).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            tracing::warn!(chat_id = %chat_id, user_id = %user_id, error = %e, "Membership lookup failed");
            false
        }
    }
}

/// `data.message_type` selects a non-text kind; anything unrecognised is text.
fn message_type_of(data: Option<&serde_json::Value>) -> MessageType {
    data.and_then(|d| d.get("message_type"))
        .and_then(|v| v.as_str())
        .and_then(|s| MessageType::from_str(s).ok())
        .unwrap_or_default()
}

async fn handle_message(
    state: &AppState,
    conn: &Connection,
    chat_id: Option<String>,
    content: String,
    data: Option<serde_json::Value>,
    received_at: DateTime<Utc>,
) {
    let user_id = conn.user_id();
    let Some(chat_id) = parse_chat_id(chat_id) else {
        return;
    };
    if content.trim().is_empty() || !is_member(state, chat_id, user_id).await {
        return;
    }

    let saved = match state
        .store()
        .create_message(NewMessage {
            chat_id,
            sender_id: user_id,
            content,
            message_type: message_type_of(data.as_ref()),
            created_at: received_at,
        })
        .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(chat_id = %chat_id, user_id = %user_id, error = %e, "Failed to persist message");
            return;
        }
    };

    let sender = state.store().find_user(user_id).await.unwrap_or_else(|e| {
        tracing::warn!(user_id = %user_id, error = %e, "Sender lookup failed");
        None
    });

    let event = WsOut::NewMessage {
        message: MessagePayload::new(saved, sender),
    };
    state.broadcast_to_chat(chat_id, &event).await;
    state.typing().clear(chat_id, user_id);
}

async fn handle_typing(state: &AppState, conn: &Connection, chat_id: Option<String>) {
    let user_id = conn.user_id();
    let Some(chat_id) = parse_chat_id(chat_id) else {
        return;
    };
    if !is_member(state, chat_id, user_id).await {
        return;
    }
    state.typing().touch(chat_id, user_id).await;
}

async fn handle_read(
    state: &AppState,
    conn: &Connection,
    chat_id: Option<String>,
    received_at: DateTime<Utc>,
) {
    let user_id = conn.user_id();
    let Some(chat_id) = parse_chat_id(chat_id) else {
        return;
    };
    if !is_member(state, chat_id, user_id).await {
        return;
    }

    let store = state.store();
    if let Err(e) = store.update_last_read(chat_id, user_id, received_at).await {
        tracing::error!(chat_id = %chat_id, user_id = %user_id, error = %e, "Failed to update read marker");
        return;
    }
    let unread_count = store
        .count_unread(chat_id, user_id, received_at)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(chat_id = %chat_id, error = %e, "Unread count failed");
            0
        });
    let message_id = store.last_message_id(chat_id).await.unwrap_or_else(|e| {
        tracing::warn!(chat_id = %chat_id, error = %e, "Last message lookup failed");
        None
    });

    let event = WsOut::Read {
        chat_id,
        user_id,
        last_read_at: received_at,
        unread_count,
        message_id,
    };
    state.broadcast_to_chat(chat_id, &event).await;
}

async fn handle_join(state: &AppState, conn: &Connection, chat_id: Option<String>) {
    let user_id = conn.user_id();
    let Some(chat_id) = parse_chat_id(chat_id) else {
        return;
    };
    if !is_member(state, chat_id, user_id).await {
        return;
    }

    conn.join_room(chat_id);
    if let Err(e) = conn.subscription().add(&chat_topic(chat_id)).await {
        tracing::warn!(chat_id = %chat_id, user_id = %user_id, error = %e, "Failed to subscribe to chat");
    }

    let event = WsOut::ChatPresence {
        chat_id,
        user_id,
        is_joined: true,
    };
    state.broadcast_to_chat(chat_id, &event).await;
}

async fn handle_leave(state: &AppState, conn: &Connection, chat_id: Option<String>) {
    let user_id = conn.user_id();
    let Some(chat_id) = parse_chat_id(chat_id) else {
        return;
    };
    if !is_member(state, chat_id, user_id).await {
        return;
    }

    // Only topics added by join_chat are dropped; connect-time chats stay subscribed.
    if conn.leave_room(chat_id) && !conn.was_member_at_connect(chat_id) {
        conn.subscription().remove(&chat_topic(chat_id)).await;
    }

    let event = WsOut::ChatPresence {
        chat_id,
        user_id,
        is_joined: false,
    };
    state.broadcast_to_chat(chat_id, &event).await;
}
