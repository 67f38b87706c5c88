//! Data models for the conversation and messaging service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vendora_core::{EntityKind, Role};

/// One side of a two-party conversation.
///
/// Doubles as the per-identity unread counter: each conversation has exactly
/// one user participant and one vendor participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub identity_id: String,
    pub role: Role,
    pub entity_kind: EntityKind,
    pub unread_count: i64,
}

/// Denormalized summary of the most recent message, for list views.
/// The message store remains the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Durable record of a user↔vendor relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Stable composite key: `{vendor_id}_{user_id}`
    pub conversation_key: String,
    pub user_id: String,
    pub vendor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub messages_count: i64,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by_role: Option<Role>,
    pub is_reported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_by_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_reason: Option<String>,
    pub participants: Vec<Participant>,
}

impl Conversation {
    /// Build the composite conversation key for a user/vendor pair
    pub fn key_for(vendor_id: &str, user_id: &str) -> String {
        format!("{}_{}", vendor_id, user_id)
    }

    pub fn is_participant(&self, identity_id: &str) -> bool {
        self.participants.iter().any(|p| p.identity_id == identity_id)
    }

    /// Unread count for one participant; absent entries read as zero
    pub fn unread_for(&self, identity_id: &str) -> i64 {
        self.participants
            .iter()
            .find(|p| p.identity_id == identity_id)
            .map(|p| p.unread_count)
            .unwrap_or(0)
    }
}

/// Optional file attachment carried by a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub name: String,
    pub size: i64,
}

/// A persisted message. The payload is immutable after creation; only the
/// per-recipient read/deleted markers change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_key: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub receiver_id: String,
    pub receiver_role: Role,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// True once the receiver has marked the conversation read
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Account directory entry consulted by the identity resolver.
/// Owned by the wider platform; this service only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    pub is_active: bool,
}

/// Request to find or create a conversation for a user/vendor pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
    pub vendor_id: String,
}

/// Request to block a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequest {
    pub actor_id: String,
    pub actor_role: String,
}

/// Request to report (and thereby block) a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub actor_id: String,
    pub actor_role: String,
    pub reason: String,
}

/// Request to send a message, shared by the REST path and the
/// real-time `send_message` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_key: String,
    pub sender_id: String,
    pub sender_role: String,
    pub receiver_id: String,
    pub receiver_role: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// Request to zero an identity's unread counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub conversation_id: String,
    pub identity_id: String,
}
