//! Types shared between the server and the client.
//!
//! This module holds everything both sides of the sync engine agree on: the
//! wire contracts for push/pull/presence, the step data structures, the
//! editor transform seam, and the shared error taxonomy.

pub mod error;
pub mod protocol;
pub mod step;
pub mod transform;

pub use error::SyncError;
pub use protocol::{
    DocumentStateView, PresenceUpdate, PullRequest, PullResponse, PushRequest, PushResponse,
    WireStep,
};
pub use step::StepRecord;
pub use transform::{EditorTransform, ReplaceTransform, TransformError};
