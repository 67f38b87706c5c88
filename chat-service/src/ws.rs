//! WebSocket transport: one connection per authenticated identity.
//!
//! A connection is always subscribed to its own identity room and may join
//! conversation rooms on demand. Outbound traffic funnels through a single
//! writer task; each subscribed room gets a forwarder task feeding it.
//! Authentication happens once at the handshake and the connection stays
//! trusted for its lifetime.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vendora_core::ChatError;

use crate::auth::{resolve_session, token_from_protocol, Principal};
use crate::events::{ClientEvent, Effect, ServerEvent};
use crate::models::Conversation;
use crate::presence::PresenceStatus;
use crate::protocol;
use crate::rooms::RoomKey;
use crate::state::AppState;

/// Upgrade handler for `GET /ws`.
///
/// Browsers cannot set Authorization headers on WebSocket handshakes, so the
/// session token arrives via the `Sec-WebSocket-Protocol` header
/// (`["bearer", "<token>"]` client-side) or, as a fallback, a `?token=`
/// query parameter. The rejected handshake carries the usual error envelope.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(token_from_protocol)
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    let principal = match resolve_session(&state.db, token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => {
            debug!(error = %err, "websocket handshake rejected");
            return err.into_response();
        }
    };

    // Echo the subprotocol so browser clients complete the handshake
    ws.protocols(["bearer"])
        .on_upgrade(move |socket| handle_socket(socket, state, principal))
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let identity_room = RoomKey::identity(principal.role, principal.identity_id.clone());
    info!(identity = %identity_room, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer task; room forwarders and error replies all feed it
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let identity_forwarder = spawn_forwarder(&state, &identity_room, tx.clone());
    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

    if state.presence.connect(&principal.identity_id) {
        announce_presence(&state, &principal, PresenceStatus::Online).await;
    }

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        state.presence.touch(&principal.identity_id);

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                debug!(identity = %identity_room, error = %err, "unparseable client event");
                send_error(&tx, &ChatError::InvalidRequest("unrecognized event".to_string()))
                    .await;
                continue;
            }
        };

        if let Err(err) = handle_event(&state, &principal, event, &tx, &mut forwarders).await {
            send_error(&tx, &err).await;
        }
    }

    // Teardown: detach every forwarder, then GC rooms left without readers
    for (key, handle) in forwarders.drain() {
        handle.abort();
        state.remove_room_if_empty(&RoomKey::conversation(key));
    }
    identity_forwarder.abort();
    state.remove_room_if_empty(&identity_room);

    if state.presence.disconnect(&principal.identity_id) {
        announce_presence(&state, &principal, PresenceStatus::Offline).await;
    }

    writer.abort();
    info!(identity = %identity_room, "websocket disconnected");
}

async fn handle_event(
    state: &AppState,
    principal: &Principal,
    event: ClientEvent,
    tx: &mpsc::Sender<String>,
    forwarders: &mut HashMap<String, JoinHandle<()>>,
) -> Result<(), ChatError> {
    match event {
        ClientEvent::JoinConversationRoom { conversation_key } => {
            let conversation = state
                .db
                .find_by_key(&conversation_key)
                .await?
                .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_key}")))?;
            if !conversation.is_participant(&principal.identity_id) {
                return Err(ChatError::Forbidden(
                    "not a participant of this conversation".to_string(),
                ));
            }

            if forwarders.contains_key(&conversation_key) {
                return Ok(());
            }
            let room = RoomKey::conversation(conversation_key.clone());
            let handle = spawn_forwarder(state, &room, tx.clone());
            forwarders.insert(conversation_key, handle);
            debug!(room = %room, identity = principal.identity_id, "joined room");
        }
        ClientEvent::LeaveConversationRoom { conversation_key } => {
            if let Some(handle) = forwarders.remove(&conversation_key) {
                handle.abort();
                state.remove_room_if_empty(&RoomKey::conversation(conversation_key));
            }
        }
        ClientEvent::SendMessage(req) => {
            if req.sender_id != principal.identity_id {
                return Err(ChatError::Forbidden(
                    "sender_id does not match the connected identity".to_string(),
                ));
            }
            let receiver_online = state.presence.is_online(&req.receiver_id);
            let (_, effects) = protocol::send_message(&state.db, &req, receiver_online).await?;
            state.dispatch(effects);
        }
        ClientEvent::ResetUnreadCount(req) => {
            if req.identity_id != principal.identity_id {
                return Err(ChatError::Forbidden(
                    "identity_id does not match the connected identity".to_string(),
                ));
            }
            let effects = protocol::mark_read(&state.db, &req.conversation_id, &req.identity_id)
                .await?;
            state.dispatch(effects);
        }
        ClientEvent::StartTyping { conversation_key } => {
            // Typing is only valid inside a room the connection has joined
            if forwarders.contains_key(&conversation_key) {
                state.dispatch(vec![protocol::typing_effect(
                    &conversation_key,
                    &principal.identity_id,
                    true,
                )]);
            }
        }
        ClientEvent::StopTyping { conversation_key } => {
            if forwarders.contains_key(&conversation_key) {
                state.dispatch(vec![protocol::typing_effect(
                    &conversation_key,
                    &principal.identity_id,
                    false,
                )]);
            }
        }
    }
    Ok(())
}

/// Subscribe the connection to a room: spawn a forwarder pumping the room's
/// broadcast channel into the connection's writer.
fn spawn_forwarder(
    state: &AppState,
    room: &RoomKey,
    tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    let mut room_rx = state.room(room).subscribe();

    tokio::spawn(async move {
        loop {
            match room_rx.recv().await {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        break;
                    }
                }
                // Lagged receivers skip dropped events and keep going
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow websocket consumer dropped events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Errors are delivered to the offending connection only, as an `error`
/// event; they are never broadcast to a room.
async fn send_error(tx: &mpsc::Sender<String>, err: &ChatError) {
    let event = ServerEvent::Error {
        code: err.error_code().to_string(),
        message: err.to_string(),
    };
    if let Ok(payload) = serde_json::to_string(&event) {
        let _ = tx.send(payload).await;
    }
}

/// Announce an online/offline transition to the conversation rooms of every
/// conversation this identity participates in. Best-effort: presence is
/// advisory and a failed listing must not tear down the connection.
async fn announce_presence(state: &AppState, principal: &Principal, status: PresenceStatus) {
    let conversations = match state
        .db
        .list_conversations(&principal.identity_id, principal.role)
        .await
    {
        Ok(conversations) => conversations,
        Err(err) => {
            warn!(identity = principal.identity_id, error = %err, "presence announce skipped");
            return;
        }
    };

    state.dispatch(presence_broadcasts(
        &conversations,
        &principal.identity_id,
        status,
    ));
}

fn presence_broadcasts(
    conversations: &[Conversation],
    identity_id: &str,
    status: PresenceStatus,
) -> Vec<Effect> {
    conversations
        .iter()
        .map(|conversation| Effect::Broadcast {
            room: RoomKey::conversation(conversation.conversation_key.clone()),
            event: ServerEvent::UserStatusChanged {
                identity_id: identity_id.to_string(),
                status,
                conversation_key: conversation.conversation_key.clone(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{run_migrations, Database};
    use crate::lifecycle;
    use sqlx::sqlite::SqlitePoolOptions;
    use vendora_core::Role;

    async fn setup_test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Database::new(pool)
    }

    #[tokio::test]
    async fn test_presence_broadcast_targets_every_conversation_room() {
        let db = setup_test_db().await;
        lifecycle::find_or_create(&db, "u1", "v1").await.unwrap();
        lifecycle::find_or_create(&db, "u1", "v2").await.unwrap();

        let conversations = db.list_conversations("u1", Role::User).await.unwrap();
        let effects = presence_broadcasts(&conversations, "u1", PresenceStatus::Online);

        assert_eq!(effects.len(), 2);
        for effect in &effects {
            match effect {
                Effect::Broadcast {
                    room: RoomKey::Conversation(key),
                    event: ServerEvent::UserStatusChanged { identity_id, status, conversation_key },
                } => {
                    assert_eq!(identity_id, "u1");
                    assert_eq!(*status, PresenceStatus::Online);
                    assert_eq!(conversation_key, key);
                }
                other => panic!("unexpected effect: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_presence_broadcast_empty_without_conversations() {
        let db = setup_test_db().await;
        let conversations = db.list_conversations("ghost", Role::User).await.unwrap();
        assert!(presence_broadcasts(&conversations, "ghost", PresenceStatus::Offline).is_empty());
    }
}
