//! Conversation lifecycle: creation, moderation transitions, listing.
//!
//! Operations return the affected conversation plus the effects the caller
//! must dispatch (room broadcasts, moderation alerts). Moderation updates are
//! last-write-wins; concurrent block/unblock races resolve by whichever
//! write lands last.

use vendora_core::{ChatError, Role};

use crate::db::Database;
use crate::events::{Effect, ServerEvent};
use crate::models::Conversation;
use crate::rooms::RoomKey;

/// Body of the system message seeded into a new conversation. It counts as
/// unread for the vendor, which is why a fresh conversation starts at
/// vendor: 1 / user: 0.
pub const WELCOME_MESSAGE: &str = "Conversation started";

/// Find the conversation for a user/vendor pair, creating it on first
/// contact. Idempotent: callers must not assume creation occurred.
///
/// Returns the conversation, whether it was created by this call, and the
/// effects to dispatch (a `new_conversation` broadcast to both identity
/// rooms, only on creation).
pub async fn find_or_create(
    db: &Database,
    user_id: &str,
    vendor_id: &str,
) -> Result<(Conversation, bool, Vec<Effect>), ChatError> {
    let user_id = user_id.trim();
    let vendor_id = vendor_id.trim();
    if user_id.is_empty() || vendor_id.is_empty() {
        return Err(ChatError::InvalidRequest(
            "user_id and vendor_id are required".to_string(),
        ));
    }

    if let Some(existing) = db.find_by_pair(user_id, vendor_id).await? {
        return Ok((existing, false, Vec::new()));
    }

    // Two first contacts can both pass the lookup above; the UNIQUE
    // constraint on conversation_key decides the winner. The loser returns
    // the winner's record instead of a store error.
    let conversation = match db.create_conversation(user_id, vendor_id).await {
        Ok(conversation) => conversation,
        Err(err) if is_unique_violation(&err) => {
            let existing = db.find_by_pair(user_id, vendor_id).await?.ok_or_else(|| {
                ChatError::StoreFailure(
                    "conversation insert conflicted but no record found".to_string(),
                )
            })?;
            return Ok((existing, false, Vec::new()));
        }
        Err(err) => return Err(err.into()),
    };

    // The welcome message goes through the normal delivery path so the
    // counters stay consistent with the message log.
    let message = db
        .insert_message(
            &conversation.conversation_key,
            user_id,
            Role::User,
            vendor_id,
            Role::Vendor,
            WELCOME_MESSAGE,
            None,
        )
        .await?;
    db.apply_message_to_summary(
        &conversation.conversation_key,
        &message.body,
        message.created_at,
        vendor_id,
        Role::Vendor,
    )
    .await?;

    let conversation = refetch(db, &conversation.id).await?;
    let effects = identity_rooms(&conversation)
        .into_iter()
        .map(|room| Effect::Broadcast {
            room,
            event: ServerEvent::NewConversation(conversation.clone()),
        })
        .collect();

    Ok((conversation, true, effects))
}

/// List an identity's conversations for one role, most recent activity first
pub async fn list(
    db: &Database,
    identity_id: &str,
    role: &str,
) -> Result<Vec<Conversation>, ChatError> {
    let role = parse_role(role)?;
    Ok(db.list_conversations(identity_id, role).await?)
}

/// Most-recently-updated conversation for a pair. An absent conversation is
/// an empty result, not an error.
pub async fn get_one(
    db: &Database,
    user_id: &str,
    vendor_id: &str,
) -> Result<Option<Conversation>, ChatError> {
    Ok(db.find_by_pair(user_id, vendor_id).await?)
}

/// Block a conversation. Blocking an already-blocked conversation is a
/// no-op success with no broadcast.
pub async fn block(
    db: &Database,
    conversation_id: &str,
    actor_id: &str,
    actor_role: &str,
) -> Result<(Conversation, Vec<Effect>), ChatError> {
    let role = parse_role(actor_role)?;
    if actor_id.trim().is_empty() {
        return Err(ChatError::InvalidRequest("actor_id is required".to_string()));
    }

    let conversation = refetch(db, conversation_id).await?;
    if conversation.is_blocked {
        return Ok((conversation, Vec::new()));
    }

    db.set_blocked(conversation_id, actor_id, role).await?;
    let conversation = refetch(db, conversation_id).await?;

    let effects = moderation_broadcasts(&conversation, true);
    Ok((conversation, effects))
}

/// Unblock a conversation, clearing block and report state together
/// (reporting implies blocking, so unblocking must undo both).
pub async fn unblock(
    db: &Database,
    conversation_id: &str,
) -> Result<(Conversation, Vec<Effect>), ChatError> {
    refetch(db, conversation_id).await?;
    db.clear_moderation(conversation_id).await?;
    let conversation = refetch(db, conversation_id).await?;

    let effects = moderation_broadcasts(&conversation, false);
    Ok((conversation, effects))
}

/// Report a conversation. Reporting also blocks it in the same update, and
/// the broadcast is indistinguishable from a plain block to the other party.
/// The moderation alert is best-effort and never fails the report.
pub async fn report(
    db: &Database,
    conversation_id: &str,
    actor_id: &str,
    actor_role: &str,
    reason: &str,
) -> Result<(Conversation, Vec<Effect>), ChatError> {
    let role = parse_role(actor_role)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ChatError::InvalidRequest(
            "report reason is required".to_string(),
        ));
    }

    refetch(db, conversation_id).await?;
    db.set_reported(conversation_id, actor_id, role, reason).await?;
    let conversation = refetch(db, conversation_id).await?;

    let mut effects = moderation_broadcasts(&conversation, true);
    effects.push(Effect::ModerationAlert {
        conversation_id: conversation_id.to_string(),
        reported_by: actor_id.to_string(),
        reason: reason.to_string(),
    });

    Ok((conversation, effects))
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db_err| db_err.is_unique_violation())
}

fn parse_role(role: &str) -> Result<Role, ChatError> {
    Role::parse(role)
        .ok_or_else(|| ChatError::InvalidRequest(format!("unrecognized role: {role}")))
}

async fn refetch(db: &Database, conversation_id: &str) -> Result<Conversation, ChatError> {
    db.get_conversation(conversation_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))
}

/// The two personal identity rooms of a conversation's participants
pub fn identity_rooms(conversation: &Conversation) -> [RoomKey; 2] {
    [
        RoomKey::identity(Role::User, conversation.user_id.clone()),
        RoomKey::identity(Role::Vendor, conversation.vendor_id.clone()),
    ]
}

fn moderation_broadcasts(conversation: &Conversation, blocked: bool) -> Vec<Effect> {
    identity_rooms(conversation)
        .into_iter()
        .map(|room| Effect::Broadcast {
            room,
            event: if blocked {
                ServerEvent::ConversationBlocked(conversation.clone())
            } else {
                ServerEvent::ConversationUnblocked(conversation.clone())
            },
        })
        .collect()
}
