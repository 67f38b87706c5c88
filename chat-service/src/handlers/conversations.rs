//! Conversation lifecycle endpoints.
//!
//! The REST surface mirrors the real-time one: handlers call into the
//! lifecycle module and dispatch whatever effects come back, so a change
//! made over HTTP still reaches connected WebSocket clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use vendora_core::{ApiResponse, ChatError};

use crate::auth::AuthPrincipal;
use crate::lifecycle;
use crate::models::{BlockRequest, Conversation, CreateConversationRequest, ReportRequest};
use crate::state::AppState;

/// `POST /conversations`: find or create the conversation for a pair.
/// Returns 201 only when this call created it.
pub async fn create(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Conversation>>), ChatError> {
    if principal.identity_id != req.user_id && principal.identity_id != req.vendor_id {
        return Err(ChatError::Forbidden(
            "authenticated identity is not part of this pair".to_string(),
        ));
    }

    let (conversation, created, effects) =
        lifecycle::find_or_create(&state.db, &req.user_id, &req.vendor_id).await?;
    state.dispatch(effects);

    let (status, message) = if created {
        (StatusCode::CREATED, "Conversation created")
    } else {
        (StatusCode::OK, "Conversation found")
    };
    Ok((status, Json(ApiResponse::ok(message, conversation))))
}

/// `GET /conversations/:id/:role`: list an identity's conversations,
/// most recent activity first
pub async fn list(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((identity_id, role)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, ChatError> {
    if principal.identity_id != identity_id {
        return Err(ChatError::Forbidden(
            "cannot list another identity's conversations".to_string(),
        ));
    }

    let conversations = lifecycle::list(&state.db, &identity_id, &role).await?;
    Ok(Json(ApiResponse::ok("Conversations fetched", conversations)))
}

/// `GET /conversations/single/:user_id/:vendor_id`: look up the
/// conversation for a pair without creating one. An absent conversation is
/// an empty success, not a 404.
pub async fn get_single(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((user_id, vendor_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Conversation>>, ChatError> {
    if principal.identity_id != user_id && principal.identity_id != vendor_id {
        return Err(ChatError::Forbidden(
            "authenticated identity is not part of this pair".to_string(),
        ));
    }

    match lifecycle::get_one(&state.db, &user_id, &vendor_id).await? {
        Some(conversation) => Ok(Json(ApiResponse::ok("Conversation found", conversation))),
        None => Ok(Json(ApiResponse::ok_empty("No conversation for this pair"))),
    }
}

/// `PATCH /conversations/:id/block`
pub async fn block(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<String>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<ApiResponse<Conversation>>, ChatError> {
    if principal.identity_id != req.actor_id {
        return Err(ChatError::Forbidden(
            "actor_id does not match the authenticated identity".to_string(),
        ));
    }

    let (conversation, effects) =
        lifecycle::block(&state.db, &conversation_id, &req.actor_id, &req.actor_role).await?;
    state.dispatch(effects);
    Ok(Json(ApiResponse::ok("Conversation blocked", conversation)))
}

/// `PATCH /conversations/:id/unblock`: clears block and report state
pub async fn unblock(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<String>,
) -> Result<Json<ApiResponse<Conversation>>, ChatError> {
    let existing = state
        .db
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))?;
    if !existing.is_participant(&principal.identity_id) {
        return Err(ChatError::Forbidden(
            "not a participant of this conversation".to_string(),
        ));
    }

    let (conversation, effects) = lifecycle::unblock(&state.db, &conversation_id).await?;
    state.dispatch(effects);
    Ok(Json(ApiResponse::ok("Conversation unblocked", conversation)))
}

/// `PATCH /conversations/:id/report`: reports and blocks in one update
pub async fn report(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ApiResponse<Conversation>>, ChatError> {
    if principal.identity_id != req.actor_id {
        return Err(ChatError::Forbidden(
            "actor_id does not match the authenticated identity".to_string(),
        ));
    }

    let (conversation, effects) = lifecycle::report(
        &state.db,
        &conversation_id,
        &req.actor_id,
        &req.actor_role,
        &req.reason,
    )
    .await?;
    state.dispatch(effects);
    Ok(Json(ApiResponse::ok("Conversation reported", conversation)))
}
