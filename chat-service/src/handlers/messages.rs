//! Message endpoints: send, history, per-identity delete, mark read

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use vendora_core::{ApiResponse, ChatError, Pagination};

use crate::auth::AuthPrincipal;
use crate::models::{MarkReadRequest, SendMessageRequest, StoredMessage};
use crate::protocol;
use crate::state::AppState;

/// `POST /messages`: persist and fan out a message. Offline receivers get
/// a best-effort push; the 201 only vouches for persistence.
pub async fn send(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StoredMessage>>), ChatError> {
    if principal.identity_id != req.sender_id {
        return Err(ChatError::Forbidden(
            "sender_id does not match the authenticated identity".to_string(),
        ));
    }

    let receiver_online = state.presence.is_online(&req.receiver_id);
    let (message, effects) = protocol::send_message(&state.db, &req, receiver_online).await?;
    state.dispatch(effects);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Message sent", message)),
    ))
}

/// `GET /messages/:conversation_key/:identity_id`: chronological history
/// for one identity, excluding messages it soft-deleted
pub async fn history(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((conversation_key, identity_id)): Path<(String, String)>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<Vec<StoredMessage>>>, ChatError> {
    if principal.identity_id != identity_id {
        return Err(ChatError::Forbidden(
            "cannot read another identity's history".to_string(),
        ));
    }

    let messages = protocol::history(&state.db, &conversation_key, &identity_id, pagination).await?;
    Ok(Json(ApiResponse::ok("Messages fetched", messages)))
}

/// `DELETE /messages/:conversation_key/:identity_id`: soft-delete the
/// whole conversation for one identity; the other side keeps its view
pub async fn delete_for_identity(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((conversation_key, identity_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ChatError> {
    if principal.identity_id != identity_id {
        return Err(ChatError::Forbidden(
            "cannot delete another identity's messages".to_string(),
        ));
    }

    let deleted = protocol::soft_delete(&state.db, &conversation_key, &identity_id).await?;
    Ok(Json(ApiResponse::ok(
        "Messages deleted",
        serde_json::json!({ "deleted": deleted }),
    )))
}

/// `PATCH /messages/read`: zero the caller's unread counter
pub async fn mark_read(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ChatError> {
    if principal.identity_id != req.identity_id {
        return Err(ChatError::Forbidden(
            "identity_id does not match the authenticated identity".to_string(),
        ));
    }

    let effects = protocol::mark_read(&state.db, &req.conversation_id, &req.identity_id).await?;
    state.dispatch(effects);
    Ok(Json(ApiResponse::ok(
        "Conversation marked read",
        serde_json::json!({ "unread_count": 0 }),
    )))
}
