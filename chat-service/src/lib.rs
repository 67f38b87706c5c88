//! Real-time conversation and messaging service for the Vendora platform.
//!
//! Users and vendors talk through durable two-party conversations. REST
//! covers lifecycle and history; a WebSocket endpoint carries the live
//! events (messages, unread counters, presence, typing, moderation).

pub mod auth;
pub mod db;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Build the service router. Kept separate from `main` so integration tests
/// can drive the full stack in-process.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .route("/conversations", post(handlers::conversations::create))
        .route(
            "/conversations/single/:user_id/:vendor_id",
            get(handlers::conversations::get_single),
        )
        .route(
            "/conversations/:id/:role",
            get(handlers::conversations::list),
        )
        .route(
            "/conversations/:id/block",
            patch(handlers::conversations::block),
        )
        .route(
            "/conversations/:id/unblock",
            patch(handlers::conversations::unblock),
        )
        .route(
            "/conversations/:id/report",
            patch(handlers::conversations::report),
        )
        .route("/messages", post(handlers::messages::send))
        .route(
            "/messages/:conversation_key/:identity_id",
            get(handlers::messages::history).delete(handlers::messages::delete_for_identity),
        )
        .route("/messages/read", patch(handlers::messages::mark_read))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
