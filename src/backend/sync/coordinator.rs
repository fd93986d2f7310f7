//! Sync Coordinator
//!
//! The server-side service every connection handler dispatches into. It owns
//! the only paths that mutate document state:
//!
//! - `submit_steps` - optimistic-concurrency push: appends a batch through the
//!   step log's per-document critical section, then fans the accepted steps
//!   out to live subscribers and parked long-poll waiters.
//! - `fetch_since` - pull: answers immediately when newer steps exist
//!   (reaching into durable storage for history older than the in-memory
//!   window), otherwise parks the caller in the waiter registry until
//!   delivery or timeout.
//! - `connect` / `disconnect` - fire-and-forget presence, which is what keeps
//!   a document safe from eviction.
//!
//! A document id that is not in memory is first looked up in durable storage
//! (an evicted document reloads transparently); only a genuinely unknown id
//! is auto-provisioned at version 0, so collaboration starts on first touch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::backend::persistence::store::DurableStore;
use crate::backend::sync::log::{
    AppendOutcome, DocumentLog, DocumentRegistry, MemoryStats, StepBroadcast,
};
use crate::backend::sync::waiters::WaiterRegistry;
use crate::shared::error::SyncError;
use crate::shared::protocol::{
    DocumentStateView, PullRequest, PullResponse, PushRequest, PushResponse, WireStep,
};
use crate::shared::step::StepRecord;
use crate::shared::transform::EditorTransform;

/// Default bound on how long a pull with no new data is held open.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(25);

/// Coordinates all document access for the server.
pub struct SyncCoordinator {
    registry: Arc<DocumentRegistry>,
    waiters: WaiterRegistry,
    transform: Arc<dyn EditorTransform>,
    store: Arc<dyn DurableStore>,
    long_poll_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        transform: Arc<dyn EditorTransform>,
        store: Arc<dyn DurableStore>,
        long_poll_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            waiters: WaiterRegistry::new(),
            transform,
            store,
            long_poll_timeout,
        }
    }

    /// The registry this coordinator serves. Shared with the persistence
    /// worker, which talks to documents only through their public mutation
    /// contract.
    pub fn registry(&self) -> Arc<DocumentRegistry> {
        self.registry.clone()
    }

    /// Submit a batch of steps at a base version.
    ///
    /// `base_version` is checked against the first step only; each subsequent
    /// step chains from the version the previous append produced. On a
    /// mid-batch conflict the accepted prefix stays committed and the
    /// response reports the authoritative version plus how many steps were
    /// applied, so the caller resubmits only the tail. Malformed payloads are
    /// skipped and counted, and the batch continues.
    pub async fn submit_steps(&self, request: PushRequest) -> Result<PushResponse, SyncError> {
        let doc = self.get_or_load(&request.document_id).await?;

        let mut expected = request.base_version;
        let mut accepted: Vec<StepRecord> = Vec::new();
        let mut skipped = 0usize;
        let mut conflict: Option<u64> = None;

        for payload in &request.steps {
            match doc
                .append(&request.client_id, payload.clone(), expected, self.transform.as_ref())
                .await
            {
                AppendOutcome::Accepted(record) => {
                    expected = record.version;
                    accepted.push(record);
                }
                AppendOutcome::Conflict { current } => {
                    conflict = Some(current);
                    break;
                }
                AppendOutcome::Malformed { .. } => {
                    skipped += 1;
                }
            }
        }

        if !accepted.is_empty() {
            let version = expected;
            let wire: Vec<WireStep> = accepted.iter().map(WireStep::from).collect();
            doc.publish(wire, version);
            self.waiters.deliver(&request.document_id, &accepted, version);
            tracing::debug!(
                "[Sync] Document {} advanced to version {} ({} steps from {})",
                request.document_id,
                version,
                accepted.len(),
                request.client_id
            );
        }

        match conflict {
            Some(current) => {
                tracing::debug!(
                    "[Sync] Version conflict on document {}: client {} at {}, authoritative {}",
                    request.document_id,
                    request.client_id,
                    request.base_version,
                    current
                );
                Ok(PushResponse {
                    accepted: false,
                    version: current,
                    applied: accepted.len(),
                    skipped,
                })
            }
            None => {
                let version = if accepted.is_empty() {
                    doc.version().await
                } else {
                    expected
                };
                Ok(PushResponse {
                    accepted: true,
                    version,
                    applied: accepted.len(),
                    skipped,
                })
            }
        }
    }

    /// Fetch steps newer than `from_version`, long-polling when there are
    /// none.
    ///
    /// Always resolves within the configured timeout bound; a timeout yields
    /// an empty, non-error response carrying the current version.
    pub async fn fetch_since(&self, request: PullRequest) -> Result<PullResponse, SyncError> {
        let doc = self.get_or_load(&request.document_id).await?;

        if let Some(response) = self.read_available(&doc, &request).await? {
            return Ok(response);
        }

        let (id, rx) = self.waiters.register(&request.document_id, request.from_version);

        // Re-check after registering: an append that raced the read above has
        // already drained the registry and would otherwise strand this waiter.
        if let Some(response) = self.read_available(&doc, &request).await? {
            self.waiters.remove(&request.document_id, id);
            return Ok(response);
        }

        match tokio::time::timeout(self.long_poll_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => {
                // Delivery raced our removal path; answer from the log.
                let (steps, version) = doc.read_since(request.from_version).await;
                Ok(PullResponse {
                    steps: steps.iter().map(WireStep::from).collect(),
                    version,
                })
            }
            Err(_elapsed) => {
                self.waiters.remove(&request.document_id, id);
                let version = doc.version().await;
                Ok(PullResponse {
                    steps: Vec::new(),
                    version,
                })
            }
        }
    }

    /// Register a client against a document. Fire-and-forget presence.
    pub async fn connect(&self, document_id: &str, client_id: &str) -> Result<(), SyncError> {
        let doc = self.get_or_load(document_id).await?;
        if doc.add_client(client_id).await {
            tracing::info!("[Sync] Client {} joined document {}", client_id, document_id);
        }
        Ok(())
    }

    /// Remove a client's presence registration.
    pub async fn disconnect(&self, document_id: &str, client_id: &str) -> Result<(), SyncError> {
        // Only documents already in memory matter here; a disconnect must not
        // resurrect an evicted document.
        if let Some(doc) = self.registry.get(document_id).await {
            if doc.remove_client(client_id).await {
                tracing::info!("[Sync] Client {} left document {}", client_id, document_id);
            }
        }
        Ok(())
    }

    /// Subscribe to live step broadcasts for a document.
    pub async fn subscribe(
        &self,
        document_id: &str,
    ) -> Result<broadcast::Receiver<StepBroadcast>, SyncError> {
        let doc = self.get_or_load(document_id).await?;
        Ok(doc.subscribe())
    }

    /// Snapshot of a document's synchronized state.
    pub async fn document_state(&self, document_id: &str) -> Result<DocumentStateView, SyncError> {
        let doc = self.get_or_load(document_id).await?;
        Ok(doc.state().await)
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.registry.memory_stats().await
    }

    pub fn waiter_count(&self, document_id: &str) -> usize {
        self.waiters.count(document_id)
    }

    /// Fetch the document from memory, reloading an evicted one from durable
    /// storage before falling back to auto-provisioning at version 0.
    async fn get_or_load(&self, document_id: &str) -> Result<Arc<DocumentLog>, SyncError> {
        if let Some(doc) = self.registry.get(document_id).await {
            return Ok(doc);
        }

        let seed = self
            .store
            .load_document(document_id)
            .await?
            .map(|persisted| (persisted.version, persisted.content));
        if seed.is_some() {
            tracing::info!("[Sync] Reloading document {} from durable storage", document_id);
        }

        let (doc, _created) = self.registry.get_or_create(document_id, seed).await;
        Ok(doc)
    }

    /// Immediately available steps newer than the request's version, merging
    /// in the durable prefix when the in-memory window no longer reaches back
    /// far enough. `None` means the caller is current and should wait.
    async fn read_available(
        &self,
        doc: &Arc<DocumentLog>,
        request: &PullRequest,
    ) -> Result<Option<PullResponse>, SyncError> {
        let (memory_steps, version) = doc.read_since(request.from_version).await;
        if request.from_version >= version {
            return Ok(None);
        }

        let window_start = memory_steps.first().map(|step| step.version);
        let mut steps: Vec<WireStep> = Vec::new();

        let need_prefix = match window_start {
            Some(first) => first > request.from_version + 1,
            // Newer versions exist but the window is empty: the whole tail
            // lives in durable storage (reloaded document).
            None => true,
        };
        if need_prefix {
            let cutoff = window_start.unwrap_or(version + 1);
            let stored = self
                .store
                .load_steps_since(&request.document_id, request.from_version)
                .await?;
            steps.extend(
                stored
                    .iter()
                    .filter(|step| step.version < cutoff)
                    .map(WireStep::from),
            );
        }
        steps.extend(memory_steps.iter().map(WireStep::from));

        Ok(Some(PullResponse { steps, version }))
    }
}
