//! Common error types for Vendora services

use thiserror::Error;

/// Common result type alias using ChatError
pub type Result<T> = std::result::Result<T, ChatError>;

/// Error taxonomy shared by the REST surface and the real-time transport.
///
/// `Unauthenticated` is only produced at connection/request authentication
/// time. `NotificationFailure` is reserved for the push/email side channels;
/// it is logged at the dispatch site and never returned on a primary path.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Notification dispatch failed: {0}")]
    NotificationFailure(String),
}

impl ChatError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Forbidden(_) => 403,
            Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::StoreFailure(_) => 500,
            Self::NotificationFailure(_) => 502,
        }
    }

    /// Get an error code string for API responses and real-time error events
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::StoreFailure(_) => "store_failure",
            Self::NotificationFailure(_) => "notification_failure",
        }
    }
}

// The store layer reports errors as anyhow; everything crossing the protocol
// boundary becomes an opaque StoreFailure.
impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        Self::StoreFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

// Implement IntoResponse for axum integration (optional feature)
#[cfg(feature = "axum-integration")]
impl axum::response::IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        use axum::{http::StatusCode, Json};

        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = Json(serde_json::json!({
            "success": false,
            "message": self.to_string(),
            "error": self.error_code(),
        }));

        (status_code, body).into_response()
    }
}
