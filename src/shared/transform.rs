//! Editor Transform Seam
//!
//! The sync engine never interprets step payloads itself; it delegates to an
//! editor transform layer through the [`EditorTransform`] trait. The server
//! uses `apply_step` to keep the content snapshot in lockstep with the log,
//! and the client additionally uses `rebase` to carry pending local steps over
//! steps that arrived from other clients.
//!
//! [`ReplaceTransform`] is the built-in implementation for JSON document
//! trees. Real editors plug in their own transform (ProseMirror-style
//! position mapping, CRDT merge, etc.) without the engine changing.

use serde_json::{json, Value};
use thiserror::Error;

use crate::shared::protocol::WireStep;

/// Errors from applying a step payload to a content snapshot.
#[derive(Debug, Error, Clone)]
pub enum TransformError {
    /// The payload does not parse as a step this transform understands.
    /// Policy: the server skips the step and continues with the batch.
    #[error("malformed step payload: {message}")]
    Malformed { message: String },

    /// The payload parsed but references a position the current content does
    /// not have. On the client this is the signal for a full resync.
    #[error("step position out of range: {message}")]
    Position { message: String },
}

impl TransformError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn position(message: impl Into<String>) -> Self {
        Self::Position {
            message: message.into(),
        }
    }
}

/// The contract the external editor transform layer fulfills.
///
/// Implementations must be pure with respect to their inputs: `apply_step`
/// returns a new content value and never mutates shared state, which is what
/// lets the server call it inside a document's critical section.
pub trait EditorTransform: Send + Sync {
    /// Apply one step payload to a content snapshot, producing the new
    /// snapshot.
    fn apply_step(&self, content: &Value, payload: &Value) -> Result<Value, TransformError>;

    /// Transform locally pending step payloads so they apply cleanly after
    /// the given remote steps have been integrated.
    fn rebase(&self, pending: Vec<Value>, remote: &[WireStep]) -> Vec<Value>;
}

/// Built-in transform for JSON document trees.
///
/// Steps are objects with a `stepType` field:
/// - `"replace"` merges the step's `slice` object into the document root
/// - `"insert"` inserts the step's `node` into the root `content` array at
///   `at` (appends when `at` is omitted)
/// - `"delete"` removes the root `content` entry at `at`
///
/// `insert` and `delete` positions past the end of the array are position
/// errors, not no-ops, so stale steps surface instead of silently drifting.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceTransform;

impl ReplaceTransform {
    fn base_document(content: &Value) -> Result<Value, TransformError> {
        match content {
            Value::Null => Ok(json!({ "type": "doc", "content": [] })),
            Value::Object(_) => Ok(content.clone()),
            other => Err(TransformError::malformed(format!(
                "content snapshot must be an object or null, got {}",
                value_kind(other)
            ))),
        }
    }

    fn content_array(doc: &mut Value) -> &mut Vec<Value> {
        let slot = doc
            .as_object_mut()
            .expect("base_document always yields an object")
            .entry("content")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        slot.as_array_mut().expect("slot was just made an array")
    }
}

impl EditorTransform for ReplaceTransform {
    fn apply_step(&self, content: &Value, payload: &Value) -> Result<Value, TransformError> {
        let step = payload
            .as_object()
            .ok_or_else(|| TransformError::malformed("step payload is not an object"))?;
        let step_type = step
            .get("stepType")
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::malformed("step payload has no stepType"))?;

        let mut doc = Self::base_document(content)?;

        match step_type {
            "replace" => {
                let slice = step
                    .get("slice")
                    .and_then(Value::as_object)
                    .ok_or_else(|| TransformError::malformed("replace step has no slice object"))?;
                let root = doc.as_object_mut().expect("doc is an object");
                for (key, value) in slice {
                    root.insert(key.clone(), value.clone());
                }
                Ok(doc)
            }
            "insert" => {
                let node = step
                    .get("node")
                    .cloned()
                    .ok_or_else(|| TransformError::malformed("insert step has no node"))?;
                let children = Self::content_array(&mut doc);
                let at = match step.get("at").and_then(Value::as_u64) {
                    Some(at) => at as usize,
                    None => children.len(),
                };
                if at > children.len() {
                    return Err(TransformError::position(format!(
                        "insert at {} but content has {} nodes",
                        at,
                        children.len()
                    )));
                }
                children.insert(at, node);
                Ok(doc)
            }
            "delete" => {
                let at = step
                    .get("at")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| TransformError::malformed("delete step has no position"))?
                    as usize;
                let children = Self::content_array(&mut doc);
                if at >= children.len() {
                    return Err(TransformError::position(format!(
                        "delete at {} but content has {} nodes",
                        at,
                        children.len()
                    )));
                }
                children.remove(at);
                Ok(doc)
            }
            other => Err(TransformError::malformed(format!(
                "unknown stepType '{other}'"
            ))),
        }
    }

    fn rebase(&self, pending: Vec<Value>, _remote: &[WireStep]) -> Vec<Value> {
        // Payloads here carry no positions relative to remote steps that this
        // transform could map; a real editor transform substitutes its own
        // position mapping.
        pending
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
