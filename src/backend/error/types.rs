//! Backend Error Types
//!
//! Errors raised while serving HTTP requests. Each variant maps to an HTTP
//! status code; the conversion to an actual response lives in
//! `conversion.rs`.
//!
//! Durable-storage failures deliberately map to a plain 500: persistence
//! trouble is an operational concern, surfaced through logs, and clients only
//! ever see that the request did not complete.

use axum::http::StatusCode;
use thiserror::Error;

use crate::shared::error::SyncError;

/// Errors produced by the HTTP layer of the sync server.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A sync-engine failure bubbled up to a handler.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Request-level problem: missing parameters, bad input, and so on.
    #[error("handler error: {message}")]
    Handler {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization failure while building a response.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a handler error with an explicit status code.
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Handler {
            status,
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request handler error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::handler(StatusCode::BAD_REQUEST, message)
    }

    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Sync(err) => match err {
                SyncError::VersionConflict { .. } => StatusCode::CONFLICT,
                SyncError::MalformedStep { .. } => StatusCode::BAD_REQUEST,
                SyncError::Durability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                SyncError::Transport { .. } => StatusCode::BAD_GATEWAY,
            },
            Self::Handler { status, .. } => *status,
            Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error message shown to the client.
    pub fn message(&self) -> String {
        match self {
            Self::Sync(err) => err.to_string(),
            Self::Handler { message, .. } => message.clone(),
            Self::Serialization(err) => err.to_string(),
        }
    }
}
