//! REST handlers. Every endpoint authenticates via [`AuthPrincipal`] and
//! responds with the shared [`ApiResponse`] envelope.

pub mod conversations;
pub mod messages;

use axum::{extract::State, Json};
use vendora_core::{ApiResponse, ChatError};

use crate::state::AppState;

/// `GET /health`: liveness probe touching the store
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ChatError> {
    if !state.db.health_check().await {
        return Err(ChatError::StoreFailure("database unreachable".to_string()));
    }
    Ok(Json(ApiResponse::ok(
        "ok",
        serde_json::json!({ "service": "chat-service" }),
    )))
}
