//! Sync HTTP Handlers
//!
//! Thin axum handlers that carry the wire contracts into the sync
//! coordinator. No handler touches document state directly; everything
//! dispatches through the coordinator's serialized entry points.
//!
//! # Routes
//!
//! - `POST /api/docs/{doc_id}/steps` - submit a step batch (push)
//! - `GET  /api/docs/{doc_id}/steps?from=N` - fetch steps (pull, long-polled)
//! - `POST /api/docs/{doc_id}/presence` - presence connect/disconnect
//! - `GET  /api/docs/{doc_id}` - document state snapshot
//! - `GET  /api/health` - liveness probe
//! - `GET  /api/stats` - in-memory log statistics

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;
use crate::backend::sync::log::MemoryStats;
use crate::shared::protocol::{
    DocumentStateView, PresenceUpdate, PullRequest, PullResponse, PushRequest, PushResponse,
};

/// Submit a batch of steps to a document.
///
/// The route path names the document; a `documentId` in the body is ignored
/// in favor of the path. The response always reports the authoritative
/// version, so a conflicted client knows where to pull from.
pub async fn push_steps(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(mut request): Json<PushRequest>,
) -> Result<Json<PushResponse>, BackendError> {
    if request.client_id.is_empty() {
        return Err(BackendError::bad_request("clientId must not be empty"));
    }
    request.document_id = doc_id;

    let response = state.coordinator.submit_steps(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PullParams {
    /// The version the caller already has
    #[serde(default)]
    from: u64,
}

/// Fetch steps newer than `from`.
///
/// When the caller is already current the request long-polls: it is held
/// until new steps are accepted or the server's timeout elapses, whichever
/// comes first. A timeout is a normal, empty response.
pub async fn pull_steps(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>, BackendError> {
    let response = state
        .coordinator
        .fetch_since(PullRequest {
            document_id: doc_id,
            from_version: params.from,
        })
        .await?;
    Ok(Json(response))
}

/// Presence notification. Connect registers the client against the document
/// (creating it on first touch); disconnect removes the registration.
pub async fn presence(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(update): Json<PresenceUpdate>,
) -> Result<StatusCode, BackendError> {
    if update.client_id.is_empty() {
        return Err(BackendError::bad_request("clientId must not be empty"));
    }
    if update.connected {
        state.coordinator.connect(&doc_id, &update.client_id).await?;
    } else {
        state.coordinator.disconnect(&doc_id, &update.client_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Current synchronized state of a document: version, content snapshot, and
/// presence count.
pub async fn document_state(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentStateView>, BackendError> {
    let view = state.coordinator.document_state(&doc_id).await?;
    Ok(Json(view))
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Aggregate statistics over the in-memory document registry.
pub async fn stats(State(state): State<AppState>) -> Json<MemoryStats> {
    Json(state.coordinator.memory_stats().await)
}
