//! Step Data Structures
//!
//! A step is one atomic edit operation: an opaque payload produced by the
//! editor's transform layer, plus the version the server assigned to it and
//! the identity of the client that submitted it.
//!
//! Steps are created only by the server when a submission is accepted. After
//! creation the only field that ever changes is the `durable` flag, which the
//! persistence worker flips once the step has been written to durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::protocol::WireStep;

/// A single accepted edit operation in a document's log.
///
/// The payload is opaque to the sync engine; only the external editor
/// transform layer knows how to interpret it. The version is assigned
/// atomically at acceptance and is never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Position of this step in the document's total order
    pub version: u64,
    /// Opaque operation data, interpreted by the editor transform layer
    pub payload: Value,
    /// Identifier of the client that submitted the step
    pub client_id: String,
    /// When the server accepted the step
    pub timestamp: DateTime<Utc>,
    /// Whether this step has been written to durable storage yet
    pub durable: bool,
}

impl StepRecord {
    /// Create a freshly accepted (not yet durable) step.
    pub fn new(version: u64, payload: Value, client_id: impl Into<String>) -> Self {
        Self {
            version,
            payload,
            client_id: client_id.into(),
            timestamp: Utc::now(),
            durable: false,
        }
    }
}

impl From<&StepRecord> for WireStep {
    fn from(record: &StepRecord) -> Self {
        WireStep {
            payload: record.payload.clone(),
            client_id: record.client_id.clone(),
            version: record.version,
        }
    }
}
