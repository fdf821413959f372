use chrono::{DateTime, Utc};
use db::models::message::{self, MessageType};
use db::models::user;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a client may send. Anything else fails to decode and is dropped.
///
/// Chat ids stay raw strings here; handlers parse them and drop the frame when
/// they are missing or malformed.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIn {
    Message {
        chat_id: Option<String>,
        #[serde(default)]
        content: String,
        data: Option<serde_json::Value>,
    },
    Typing {
        chat_id: Option<String>,
    },
    Read {
        chat_id: Option<String>,
    },
    JoinChat {
        chat_id: Option<String>,
    },
    LeaveChat {
        chat_id: Option<String>,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOut {
    NewMessage {
        message: MessagePayload,
    },
    Typing {
        chat_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        timestamp: i64,
    },
    Read {
        chat_id: Uuid,
        user_id: Uuid,
        last_read_at: DateTime<Utc>,
        unread_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
    },
    OnlineStatus {
        user_id: Uuid,
        is_online: bool,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },
    ChatPresence {
        chat_id: Uuid,
        user_id: Uuid,
        is_joined: bool,
    },
    Pong {
        timestamp: i64,
    },
    UserChats {
        chat_ids: Vec<Uuid>,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl WsOut {
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| tracing::error!(error = %e, "Failed to serialize outbound event"))
            .ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderInfo {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
}

impl MessagePayload {
    pub fn new(msg: message::Model, sender: Option<user::Model>) -> Self {
        Self {
            id: msg.id,
            chat_id: msg.chat_id,
            sender_id: msg.sender_id,
            sender: sender.map(|u| SenderInfo {
                id: u.id,
                username: u.username,
                display_name: u.display_name,
            }),
            content: msg.content,
            message_type: msg.message_type,
            created_at: msg.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn inbound_frames_decode_by_tag() {
        let frame: WsIn =
            serde_json::from_str(r#"{"type":"message","chat_id":"c1","content":"hi","timestamp":1}"#)
                .unwrap();
        assert!(matches!(
            frame,
            WsIn::Message { chat_id: Some(ref c), ref content, data: None } if c == "c1" && content == "hi"
        ));

        let frame: WsIn = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert!(matches!(frame, WsIn::Typing { chat_id: None }));

        let frame: WsIn = serde_json::from_str(r#"{"type":"ping","timestamp":5}"#).unwrap();
        assert!(matches!(frame, WsIn::Ping));
    }

    #[test]
    fn unknown_or_untagged_frames_fail_to_decode() {
        assert!(serde_json::from_str::<WsIn>(r#"{"type":"shout"}"#).is_err());
        assert!(serde_json::from_str::<WsIn>(r#"{"chat_id":"c1"}"#).is_err());
        assert!(serde_json::from_str::<WsIn>("not json").is_err());
    }

    #[test]
    fn outbound_events_use_stable_field_names() {
        let chat_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let typing: Value = serde_json::from_str(
            &WsOut::Typing { chat_id, user_id, is_typing: false, timestamp: 7 }
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            typing,
            json!({
                "type": "typing",
                "chat_id": chat_id,
                "user_id": user_id,
                "is_typing": false,
                "timestamp": 7
            })
        );

        let read: Value = serde_json::from_str(
            &WsOut::Read {
                chat_id,
                user_id,
                last_read_at: Utc::now(),
                unread_count: 0,
                message_id: None,
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(read["type"], "read");
        assert!(read.get("message_id").is_none());
        assert!(read["last_read_at"].is_string());

        let online: Value = serde_json::from_str(
            &WsOut::OnlineStatus { user_id, is_online: true, timestamp: 1, last_seen: None }
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(online["type"], "online_status");
        assert!(online.get("last_seen").is_none());
    }
}
