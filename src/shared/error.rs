//! Shared Error Types
//!
//! The failure taxonomy shared by the server and the client:
//!
//! - `VersionConflict` - a submit's base version did not match the
//!   authoritative version. Recoverable: pull the tail, rebase, resubmit.
//! - `MalformedStep` - a payload failed to parse or apply. The offending step
//!   is skipped; repeated position trouble triggers a full resync.
//! - `Durability` - a durable-storage write failed. Retried on the next
//!   persistence tick, never surfaced to clients.
//! - `Transport` - the connection dropped mid-operation. The client backs off
//!   and resumes from its last known version.
//!
//! All variants are `Send + Sync` and safe to cross task boundaries.
use thiserror::Error;

use crate::shared::transform::TransformError;

/// Errors produced by the sync engine.
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// The caller's assumed base version does not match the document.
    #[error("version conflict: authoritative version is {current}")]
    VersionConflict {
        /// The document's actual current version
        current: u64,
    },

    /// A step payload could not be parsed or applied.
    #[error("malformed step: {reason}")]
    MalformedStep {
        /// Human-readable reason
        reason: String,
    },

    /// A durable-storage operation failed.
    #[error("durable storage failure: {message}")]
    Durability {
        /// Human-readable message
        message: String,
    },

    /// The transport dropped or refused the operation.
    #[error("transport failure: {message}")]
    Transport {
        /// Human-readable message
        message: String,
    },
}

impl SyncError {
    /// Create a version conflict carrying the authoritative version.
    pub fn conflict(current: u64) -> Self {
        Self::VersionConflict { current }
    }

    /// Create a malformed-step error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedStep {
            reason: reason.into(),
        }
    }

    /// Create a durability error.
    pub fn durability(message: impl Into<String>) -> Self {
        Self::Durability {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl From<TransformError> for SyncError {
    fn from(err: TransformError) -> Self {
        Self::malformed(err.to_string())
    }
}
