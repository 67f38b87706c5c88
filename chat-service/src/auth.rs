//! Session-based identity resolution.
//!
//! Sessions are issued elsewhere in the platform; this service only resolves
//! an opaque credential to an authenticated principal. The check runs once
//! per WebSocket handshake (the connection stays trusted for its lifetime)
//! and once per REST request via the extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use vendora_core::{ChatError, Role};

use crate::db::Database;
use crate::state::AppState;

/// Authenticated principal behind a connection or request
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity_id: String,
    pub role: Role,
    pub display_name: String,
    pub language: String,
}

/// Resolve a session credential to a principal.
///
/// Missing credential, unknown session, and inactive account all collapse
/// into `Unauthenticated`; callers cannot distinguish them.
pub async fn resolve_session(db: &Database, token: Option<&str>) -> Result<Principal, ChatError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(ChatError::Unauthenticated),
    };

    let identity = db
        .identity_for_session(token)
        .await
        .map_err(|e| ChatError::StoreFailure(e.to_string()))?
        .ok_or(ChatError::Unauthenticated)?;

    Ok(Principal {
        identity_id: identity.id,
        role: identity.role,
        display_name: identity.display_name,
        language: identity.language,
    })
}

/// Extracts the session token from a Sec-WebSocket-Protocol header.
///
/// Browsers cannot set Authorization headers on WebSocket connections, so
/// clients send `new WebSocket(url, ["bearer", "<token>"])` which arrives as
/// `Sec-WebSocket-Protocol: bearer, <token>`. A bare token is also accepted
/// for non-browser clients.
pub fn token_from_protocol(header: &str) -> Option<&str> {
    let parts: Vec<&str> = header.split(',').map(|s| s.trim()).collect();

    if parts.len() >= 2 && parts[0].eq_ignore_ascii_case("bearer") {
        return Some(parts[1]).filter(|t| !t.is_empty());
    }

    if parts.len() == 1 && !parts[0].is_empty() && !parts[0].eq_ignore_ascii_case("bearer") {
        return Some(parts[0]);
    }

    None
}

/// Authenticated principal extractor for REST handlers.
///
/// Resolves the bearer token in the Authorization header against the
/// session store.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ChatError::Unauthenticated)?;

        let principal = resolve_session(&state.db, Some(bearer.token())).await?;
        Ok(AuthPrincipal(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use crate::models::Identity;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Database::new(pool)
    }

    #[test]
    fn test_token_from_protocol_bearer_format() {
        assert_eq!(token_from_protocol("bearer, abc123"), Some("abc123"));
        assert_eq!(token_from_protocol("Bearer, abc123"), Some("abc123"));
    }

    #[test]
    fn test_token_from_protocol_direct() {
        assert_eq!(token_from_protocol("abc123"), Some("abc123"));
    }

    #[test]
    fn test_token_from_protocol_empty() {
        assert_eq!(token_from_protocol(""), None);
        assert_eq!(token_from_protocol("bearer"), None);
    }

    #[tokio::test]
    async fn test_resolve_session_happy_path() {
        let db = setup_test_db().await;
        db.upsert_identity(&Identity {
            id: "u1".to_string(),
            role: Role::User,
            display_name: "Alice".to_string(),
            language: "en".to_string(),
            push_token: None,
            is_active: true,
        })
        .await
        .unwrap();
        let token = db.create_session("u1").await.unwrap();

        let principal = resolve_session(&db, Some(&token)).await.unwrap();
        assert_eq!(principal.identity_id, "u1");
        assert_eq!(principal.role, Role::User);
        assert_eq!(principal.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_resolve_session_failures() {
        let db = setup_test_db().await;

        assert!(matches!(
            resolve_session(&db, None).await,
            Err(ChatError::Unauthenticated)
        ));
        assert!(matches!(
            resolve_session(&db, Some("")).await,
            Err(ChatError::Unauthenticated)
        ));
        assert!(matches!(
            resolve_session(&db, Some("unknown")).await,
            Err(ChatError::Unauthenticated)
        ));
    }
}
