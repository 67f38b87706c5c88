//! Real-time event surface and handler effects.
//!
//! Client and server events are internally tagged JSON. Handlers do not talk
//! to the socket layer directly; they return [`Effect`]s which the transport
//! (or a test harness) dispatches.

use serde::{Deserialize, Serialize};

use crate::models::{Conversation, MarkReadRequest, SendMessageRequest, StoredMessage};
use crate::presence::PresenceStatus;
use crate::rooms::RoomKey;

/// Events a connected client may emit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversationRoom { conversation_key: String },
    LeaveConversationRoom { conversation_key: String },
    SendMessage(SendMessageRequest),
    ResetUnreadCount(MarkReadRequest),
    StartTyping { conversation_key: String },
    StopTyping { conversation_key: String },
}

/// Events the server broadcasts or replies with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(StoredMessage),
    NewConversation(Conversation),
    ConversationBlocked(Conversation),
    ConversationUnblocked(Conversation),
    UnreadCount {
        conversation_id: String,
        identity_id: String,
        unread_count: i64,
    },
    UserStatusChanged {
        identity_id: String,
        status: PresenceStatus,
        conversation_key: String,
    },
    Typing {
        conversation_key: String,
        identity_id: String,
        typing: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Side effects produced by protocol handlers, dispatched by the transport.
///
/// Broadcasts are delivered to room subscribers; the notification variants
/// are best-effort and must never fail the operation that produced them.
#[derive(Debug, Clone)]
pub enum Effect {
    Broadcast {
        room: RoomKey,
        event: ServerEvent,
    },
    Push {
        push_token: String,
        title: String,
        body: String,
    },
    ModerationAlert {
        conversation_id: String,
        reported_by: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parsing() {
        let json = r#"{"type": "join_conversation_room", "conversation_key": "v1_u1"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::JoinConversationRoom { conversation_key } => {
                assert_eq!(conversation_key, "v1_u1");
            }
            _ => panic!("Expected JoinConversationRoom"),
        }
    }

    #[test]
    fn test_send_message_event_parsing() {
        let json = r#"{
            "type": "send_message",
            "conversation_key": "v1_u1",
            "sender_id": "u1",
            "sender_role": "user",
            "receiver_id": "v1",
            "receiver_role": "vendor",
            "message": "Hi"
        }"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.message, "Hi");
                assert_eq!(req.receiver_id, "v1");
            }
            _ => panic!("Expected SendMessage"),
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let json = r#"{"type": "drop_tables"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_server_event_tagging() {
        let event = ServerEvent::UnreadCount {
            conversation_id: "c1".to_string(),
            identity_id: "v1".to_string(),
            unread_count: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"unread_count\""));
        assert!(json.contains("\"unread_count\":0"));
    }
}
