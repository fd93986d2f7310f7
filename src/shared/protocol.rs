//! Wire Protocol Contracts
//!
//! This module defines the message contracts exchanged between clients and the
//! sync server. The contracts are transport-agnostic: the same types travel
//! over the HTTP routes in `backend::sync::handlers` and over any in-process
//! transport used in tests.
//!
//! # Messages
//!
//! - **Push**: submit locally produced steps at a base version
//! - **Pull**: fetch steps newer than a known version (long-polled when empty)
//! - **Presence**: fire-and-forget connect/disconnect notifications
//!
//! All types serialize as camelCase JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A step as it appears on the wire: opaque payload, origin, and the version
/// the server assigned at acceptance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireStep {
    /// Opaque operation data
    pub payload: Value,
    /// Identifier of the originating client, used for attribution and for
    /// suppressing echo loops on the client side
    pub client_id: String,
    /// Version assigned by the server
    pub version: u64,
}

/// Request to append a batch of steps to a document.
///
/// `base_version` is validated against the first step only; each later step in
/// the batch chains from the version produced by the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Target document. May be omitted in an HTTP body, where the route path
    /// is authoritative.
    #[serde(default)]
    pub document_id: String,
    /// The version the client believes the document is at
    pub base_version: u64,
    /// Opaque step payloads, in application order
    pub steps: Vec<Value>,
    /// Identifier of the submitting client
    pub client_id: String,
}

/// Outcome of a push.
///
/// On success `version` is the new document version. On a version conflict
/// `accepted` is false and `version` carries the authoritative current
/// version; `applied` reports how many steps of the batch were committed
/// before the conflict so the caller can resubmit only the tail. `skipped`
/// counts payloads the server could not apply (malformed steps are skipped,
/// the rest of the batch still runs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub accepted: bool,
    pub version: u64,
    pub applied: usize,
    pub skipped: usize,
}

/// Request for steps newer than `from_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub document_id: String,
    pub from_version: u64,
}

/// Steps newer than the requested version, plus the current document version.
///
/// An empty `steps` with the current version is a valid response: it is what a
/// long-polled pull returns when its wait times out, and signals the client to
/// simply poll again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub steps: Vec<WireStep>,
    pub version: u64,
}

/// Presence notification: a client connected to or disconnected from a
/// document. Not part of the versioned log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub client_id: String,
    /// true on connect, false on disconnect
    pub connected: bool,
}

/// Snapshot view of a document's synchronized state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStateView {
    pub document_id: String,
    pub version: u64,
    pub content: Value,
    pub connected_clients: usize,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_request_camel_case() {
        let req = PushRequest {
            document_id: "doc-1".to_string(),
            base_version: 3,
            steps: vec![json!({"stepType": "replace"})],
            client_id: "client-a".to_string(),
        };
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(encoded["documentId"], "doc-1");
        assert_eq!(encoded["baseVersion"], 3);
        assert_eq!(encoded["clientId"], "client-a");
    }

    #[test]
    fn test_push_request_document_id_defaults_to_empty() {
        let req: PushRequest = serde_json::from_value(json!({
            "baseVersion": 0,
            "steps": [],
            "clientId": "client-a"
        }))
        .unwrap();
        assert!(req.document_id.is_empty());
    }

    #[test]
    fn test_pull_response_round_trip() {
        let resp = PullResponse {
            steps: vec![WireStep {
                payload: json!({"stepType": "insert"}),
                client_id: "client-b".to_string(),
                version: 4,
            }],
            version: 4,
        };
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: PullResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, resp);
    }
}
