//! Message delivery protocol: send, read/unread, soft delete, history.
//!
//! Each operation persists first, then returns the effects (broadcasts,
//! best-effort push) for the transport to dispatch. The message log is the
//! source of truth; the conversation summary is denormalized on top of it.

use tracing::warn;
use vendora_core::{ChatError, Pagination, Role};

use crate::db::Database;
use crate::events::{Effect, ServerEvent};
use crate::lifecycle::identity_rooms;
use crate::models::{Conversation, SendMessageRequest, StoredMessage};
use crate::rooms::RoomKey;

/// Persist and fan out one message.
///
/// Order matters: the append to the message log is the unit that can fail
/// the operation. The summary update and the broadcasts come after and are
/// never rolled back; a stale summary is logged, not propagated.
///
/// `receiver_online` comes from the transport's presence map; an offline
/// receiver with a registered push token gets a push effect.
pub async fn send_message(
    db: &Database,
    req: &SendMessageRequest,
    receiver_online: bool,
) -> Result<(StoredMessage, Vec<Effect>), ChatError> {
    let sender_role = parse_role(&req.sender_role)?;
    let receiver_role = parse_role(&req.receiver_role)?;
    if req.message.trim().is_empty() && req.attachment.is_none() {
        return Err(ChatError::InvalidRequest(
            "message body or attachment is required".to_string(),
        ));
    }

    let conversation = fetch_by_key(db, &req.conversation_key).await?;
    if !conversation.is_participant(&req.sender_id) {
        return Err(ChatError::Forbidden(
            "sender is not a participant of this conversation".to_string(),
        ));
    }
    if !conversation.is_participant(&req.receiver_id) {
        return Err(ChatError::InvalidRequest(
            "receiver is not a participant of this conversation".to_string(),
        ));
    }
    if conversation.is_blocked {
        return Err(ChatError::Forbidden("conversation is blocked".to_string()));
    }

    let message = db
        .insert_message(
            &req.conversation_key,
            &req.sender_id,
            sender_role,
            &req.receiver_id,
            receiver_role,
            req.message.trim(),
            req.attachment.as_ref(),
        )
        .await?;

    // Summary divergence is tolerated: the message above is ground truth.
    if let Err(err) = db
        .apply_message_to_summary(
            &req.conversation_key,
            &message.body,
            message.created_at,
            &req.receiver_id,
            receiver_role,
        )
        .await
    {
        warn!(
            conversation = req.conversation_key,
            message = message.id,
            error = %err,
            "message persisted but summary update failed"
        );
    }

    let conversation = fetch_by_key(db, &req.conversation_key).await?;

    let mut effects = vec![Effect::Broadcast {
        room: RoomKey::conversation(req.conversation_key.clone()),
        event: ServerEvent::NewMessage(message.clone()),
    }];
    // Summary delta for conversation-list UIs not viewing this thread
    for room in identity_rooms(&conversation) {
        effects.push(Effect::Broadcast {
            room,
            event: ServerEvent::NewConversation(conversation.clone()),
        });
    }

    if !receiver_online {
        if let Some(effect) = push_effect(db, &req.sender_id, &req.receiver_id, &message).await {
            effects.push(effect);
        }
    }

    Ok((message, effects))
}

/// Zero one identity's unread counter and mark its messages read.
/// Idempotent; the updated count goes to that identity's own room only.
pub async fn mark_read(
    db: &Database,
    conversation_id: &str,
    identity_id: &str,
) -> Result<Vec<Effect>, ChatError> {
    let conversation = db
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;

    let role = conversation
        .participants
        .iter()
        .find(|p| p.identity_id == identity_id)
        .map(|p| p.role)
        .ok_or_else(|| {
            ChatError::Forbidden("identity is not a participant of this conversation".to_string())
        })?;

    db.reset_unread(conversation_id, identity_id).await?;
    db.mark_messages_read(&conversation.conversation_key, identity_id)
        .await?;

    Ok(vec![Effect::Broadcast {
        room: RoomKey::identity(role, identity_id.to_string()),
        event: ServerEvent::UnreadCount {
            conversation_id: conversation_id.to_string(),
            identity_id: identity_id.to_string(),
            unread_count: 0,
        },
    }])
}

/// Soft-delete every message in a conversation for one identity. The other
/// participant's view and the audit trail stay intact.
pub async fn soft_delete(
    db: &Database,
    conversation_key: &str,
    identity_id: &str,
) -> Result<u64, ChatError> {
    let conversation = fetch_by_key(db, conversation_key).await?;
    if !conversation.is_participant(identity_id) {
        return Err(ChatError::Forbidden(
            "identity is not a participant of this conversation".to_string(),
        ));
    }

    Ok(db.soft_delete_all(conversation_key, identity_id).await?)
}

/// Message history for one identity, excluding its soft-deleted messages,
/// in chronological order
pub async fn history(
    db: &Database,
    conversation_key: &str,
    identity_id: &str,
    pagination: Pagination,
) -> Result<Vec<StoredMessage>, ChatError> {
    let conversation = fetch_by_key(db, conversation_key).await?;
    if !conversation.is_participant(identity_id) {
        return Err(ChatError::Forbidden(
            "identity is not a participant of this conversation".to_string(),
        ));
    }

    Ok(db
        .history(
            conversation_key,
            identity_id,
            pagination.limit.clamp(1, 100),
            pagination.offset.max(0),
        )
        .await?)
}

/// Ephemeral typing indicator for the conversation room. Never persisted,
/// no delivery guarantee.
pub fn typing_effect(conversation_key: &str, identity_id: &str, typing: bool) -> Effect {
    Effect::Broadcast {
        room: RoomKey::conversation(conversation_key.to_string()),
        event: ServerEvent::Typing {
            conversation_key: conversation_key.to_string(),
            identity_id: identity_id.to_string(),
            typing,
        },
    }
}

async fn push_effect(
    db: &Database,
    sender_id: &str,
    receiver_id: &str,
    message: &StoredMessage,
) -> Option<Effect> {
    let receiver = match db.get_identity(receiver_id).await {
        Ok(identity) => identity?,
        Err(err) => {
            warn!(receiver = receiver_id, error = %err, "push token lookup failed");
            return None;
        }
    };
    let push_token = receiver.push_token?;

    let sender_name = match db.get_identity(sender_id).await {
        Ok(Some(identity)) => identity.display_name,
        _ => sender_id.to_string(),
    };

    let body = if message.body.is_empty() {
        message
            .attachment
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_default()
    } else {
        message.body.clone()
    };

    Some(Effect::Push {
        push_token,
        title: format!("New message from {sender_name}"),
        body,
    })
}

fn parse_role(role: &str) -> Result<Role, ChatError> {
    Role::parse(role)
        .ok_or_else(|| ChatError::InvalidRequest(format!("unrecognized role: {role}")))
}

async fn fetch_by_key(db: &Database, conversation_key: &str) -> Result<Conversation, ChatError> {
    db.find_by_key(conversation_key)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_key}")))
}
