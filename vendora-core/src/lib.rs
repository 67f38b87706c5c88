//! Shared types for Vendora services
//!
//! Provides the common error taxonomy and wire models (roles, response
//! envelope, pagination) used by the chat service and its callers.

pub mod error;
pub mod models;

pub use error::{ChatError, Result};
pub use models::{ApiResponse, EntityKind, Pagination, Role};
