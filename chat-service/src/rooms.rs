//! Typed room naming for the broadcast layer.
//!
//! Room names used to be ad-hoc strings built at call sites; a closed enum
//! keeps identity rooms and conversation rooms from colliding and makes the
//! membership checks explicit.

use std::fmt;
use vendora_core::Role;

/// Key identifying one broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Every active connection for one participant (list-level updates,
    /// presence, unread counters)
    Identity(Role, String),
    /// Connections currently viewing one conversation
    Conversation(String),
}

impl RoomKey {
    pub fn identity(role: Role, identity_id: impl Into<String>) -> Self {
        Self::Identity(role, identity_id.into())
    }

    pub fn conversation(conversation_key: impl Into<String>) -> Self {
        Self::Conversation(conversation_key.into())
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(role, id) => write!(f, "{}:{}", role.as_str(), id),
            Self::Conversation(key) => write!(f, "conversation:{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_names() {
        assert_eq!(RoomKey::identity(Role::User, "u1").to_string(), "user:u1");
        assert_eq!(RoomKey::identity(Role::Vendor, "v1").to_string(), "vendor:v1");
        assert_eq!(RoomKey::conversation("v1_u1").to_string(), "conversation:v1_u1");
    }

    #[test]
    fn test_identity_rooms_distinct_by_role() {
        // The same raw id under different roles must map to different rooms
        assert_ne!(
            RoomKey::identity(Role::User, "42"),
            RoomKey::identity(Role::Vendor, "42")
        );
    }
}
