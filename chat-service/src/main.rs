//! Chat Service - real-time user/vendor conversations
//!
//! Features:
//! - Conversation lifecycle with block/unblock/report moderation
//! - Message delivery with per-participant unread counters
//! - Room-based WebSocket broadcasting with presence and typing
//! - Session-token authentication against the platform session store

use chat_service::db::{run_migrations, Database};
use chat_service::notify::Notifier;
use chat_service::state::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_service=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Chat Service starting...");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://chat.db?mode=rwc".to_string());

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    run_migrations(&pool).await?;
    tracing::info!("Connected to database and ran migrations");

    let state = AppState::new(Database::new(pool), Notifier::from_env());
    let app = chat_service::app(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Chat Service listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
