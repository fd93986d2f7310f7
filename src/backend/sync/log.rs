//! Step Log Store
//!
//! This module owns the authoritative, version-ordered log of accepted steps
//! for every document the server currently holds in memory.
//!
//! # Architecture
//!
//! - [`DocumentLog`] is one document's state: version counter, content
//!   snapshot, the contiguous in-memory step window, connected clients, and a
//!   broadcast channel for live subscribers. All mutation goes through the
//!   write half of a `tokio::sync::RwLock`, which is the per-document
//!   single-writer critical section: two concurrent appends can never
//!   interleave their version checks.
//! - [`DocumentRegistry`] is the process-scoped map of documents. Entries are
//!   created on first touch and removed only by the eviction task.
//!
//! # Ordering
//!
//! Versions increase by exactly one per accepted step and are never reused.
//! Steps are immutable once appended (only the `durable` flag ever flips), so
//! read paths take the read half of the lock and run without exclusion.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::shared::protocol::{DocumentStateView, WireStep};
use crate::shared::step::StepRecord;
use crate::shared::transform::{EditorTransform, TransformError};

/// Capacity of each document's live-update broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Result of an append attempt.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The step was accepted and assigned the contained record's version.
    Accepted(StepRecord),
    /// The expected version did not match; nothing was mutated.
    Conflict { current: u64 },
    /// The payload failed to apply; nothing was mutated.
    Malformed { reason: String },
}

/// Steps accepted in one submission, published to live subscribers in
/// acceptance order.
#[derive(Debug, Clone)]
pub struct StepBroadcast {
    pub document_id: String,
    pub steps: Vec<WireStep>,
    pub version: u64,
}

#[derive(Debug)]
struct DocumentInner {
    version: u64,
    content: Value,
    steps: Vec<StepRecord>,
    clients: HashSet<String>,
    last_updated: DateTime<Utc>,
}

/// Per-document statistics, mostly for the stats endpoint and logs.
#[derive(Debug, Clone)]
pub struct DocumentStats {
    pub document_id: String,
    pub version: u64,
    pub total_steps: usize,
    pub non_durable_steps: usize,
    pub connected_clients: usize,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate statistics over every document in memory.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_documents: usize,
    pub total_steps: usize,
    pub total_active_clients: usize,
    pub average_steps_per_document: usize,
}

/// A single document's synchronized state.
///
/// The write lock serializes `append`, `mark_durable`, `trim`, and presence
/// changes; everything else reads.
#[derive(Debug)]
pub struct DocumentLog {
    document_id: String,
    inner: RwLock<DocumentInner>,
    broadcast_tx: broadcast::Sender<StepBroadcast>,
}

impl DocumentLog {
    /// Create a fresh document at version 0 with empty content.
    pub fn new(document_id: impl Into<String>) -> Self {
        Self::with_state(document_id, 0, Value::Null)
    }

    /// Create a document hydrated from a durable snapshot. The step window
    /// starts empty; older history stays answerable from durable storage.
    pub fn with_state(document_id: impl Into<String>, version: u64, content: Value) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            document_id: document_id.into(),
            inner: RwLock::new(DocumentInner {
                version,
                content,
                steps: Vec::new(),
                clients: HashSet::new(),
                last_updated: Utc::now(),
            }),
            broadcast_tx,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Append one step under the document's critical section.
    ///
    /// Accepts only when `expected_version` equals the current version; on
    /// acceptance the step is assigned `version + 1`, the content snapshot is
    /// advanced through the transform, and the new record is returned. On a
    /// version mismatch or a transform failure nothing is mutated.
    pub async fn append(
        &self,
        client_id: &str,
        payload: Value,
        expected_version: u64,
        transform: &dyn EditorTransform,
    ) -> AppendOutcome {
        let mut inner = self.inner.write().await;

        if expected_version != inner.version {
            return AppendOutcome::Conflict {
                current: inner.version,
            };
        }

        let new_content = match transform.apply_step(&inner.content, &payload) {
            Ok(content) => content,
            Err(TransformError::Malformed { message })
            | Err(TransformError::Position { message }) => {
                tracing::warn!(
                    "[Sync] Skipping unappliable step for document {}: {}",
                    self.document_id,
                    message
                );
                return AppendOutcome::Malformed { reason: message };
            }
        };

        let version = inner.version + 1;
        let record = StepRecord::new(version, payload, client_id);
        inner.content = new_content;
        inner.steps.push(record.clone());
        inner.version = version;
        inner.last_updated = Utc::now();

        AppendOutcome::Accepted(record)
    }

    /// Steps with `version > from_version`, ascending, plus the current
    /// version. The returned window may start later than `from_version + 1`
    /// when older steps have been trimmed to durable storage.
    pub async fn read_since(&self, from_version: u64) -> (Vec<StepRecord>, u64) {
        let inner = self.inner.read().await;
        let steps = inner
            .steps
            .iter()
            .filter(|step| step.version > from_version)
            .cloned()
            .collect();
        (steps, inner.version)
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    pub async fn content(&self) -> Value {
        self.inner.read().await.content.clone()
    }

    /// Mark the listed versions as written to durable storage.
    /// Called only by the persistence worker, after a successful batch write.
    pub async fn mark_durable(&self, versions: &[u64]) {
        let mut inner = self.inner.write().await;
        for step in inner.steps.iter_mut() {
            if versions.contains(&step.version) {
                step.durable = true;
            }
        }
    }

    /// Drop old durable steps, keeping the most recent `keep` records.
    /// A non-durable step is never dropped regardless of `keep`.
    pub async fn trim(&self, keep: usize) {
        let mut inner = self.inner.write().await;
        let cut = inner.steps.len().saturating_sub(keep);
        if cut == 0 {
            return;
        }
        let mut index = 0;
        inner.steps.retain(|step| {
            let keep_it = index >= cut || !step.durable;
            index += 1;
            keep_it
        });
    }

    /// Steps not yet written to durable storage, ascending.
    pub async fn non_durable_steps(&self) -> Vec<StepRecord> {
        let inner = self.inner.read().await;
        inner
            .steps
            .iter()
            .filter(|step| !step.durable)
            .cloned()
            .collect()
    }

    /// Whether the flush task should pick this document up: it has
    /// non-durable steps and has been quiet for at least `threshold`.
    pub async fn needs_flush(&self, threshold: Duration) -> bool {
        let inner = self.inner.read().await;
        let has_pending = inner.steps.iter().any(|step| !step.durable);
        has_pending && inner.last_updated <= Utc::now() - saturating_chrono(threshold)
    }

    /// Whether the eviction task may drop this document: no connected
    /// clients, idle past `idle_window`, and every step safely durable.
    pub async fn is_evictable(&self, idle_window: Duration) -> bool {
        let inner = self.inner.read().await;
        inner.clients.is_empty()
            && inner.last_updated <= Utc::now() - saturating_chrono(idle_window)
            && inner.steps.iter().all(|step| step.durable)
    }

    /// Register a connected client. Returns false if it was already present.
    pub async fn add_client(&self, client_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.clients.insert(client_id.to_string())
    }

    /// Remove a connected client. Returns false if it was not present.
    pub async fn remove_client(&self, client_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.clients.remove(client_id)
    }

    /// Subscribe to live step broadcasts for this document.
    pub fn subscribe(&self) -> broadcast::Receiver<StepBroadcast> {
        self.broadcast_tx.subscribe()
    }

    /// Publish accepted steps to live subscribers. No subscribers is fine.
    pub fn publish(&self, steps: Vec<WireStep>, version: u64) {
        let _ = self.broadcast_tx.send(StepBroadcast {
            document_id: self.document_id.clone(),
            steps,
            version,
        });
    }

    /// Snapshot view for the state endpoint.
    pub async fn state(&self) -> DocumentStateView {
        let inner = self.inner.read().await;
        DocumentStateView {
            document_id: self.document_id.clone(),
            version: inner.version,
            content: inner.content.clone(),
            connected_clients: inner.clients.len(),
            last_updated: inner.last_updated,
        }
    }

    pub async fn stats(&self) -> DocumentStats {
        let inner = self.inner.read().await;
        DocumentStats {
            document_id: self.document_id.clone(),
            version: inner.version,
            total_steps: inner.steps.len(),
            non_durable_steps: inner.steps.iter().filter(|s| !s.durable).count(),
            connected_clients: inner.clients.len(),
            last_updated: inner.last_updated,
        }
    }
}

/// Process-scoped registry of in-memory documents.
///
/// Entries are created lazily on first touch and removed only by the eviction
/// task. All access from connection handlers goes through the sync
/// coordinator, never directly.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    documents: RwLock<HashMap<String, Arc<DocumentLog>>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a document without creating it.
    pub async fn get(&self, document_id: &str) -> Option<Arc<DocumentLog>> {
        let docs = self.documents.read().await;
        docs.get(document_id).cloned()
    }

    /// Get a document, creating it from `seed` (or fresh at version 0) if it
    /// is not in memory. Returns the log and whether it was just created.
    pub async fn get_or_create(
        &self,
        document_id: &str,
        seed: Option<(u64, Value)>,
    ) -> (Arc<DocumentLog>, bool) {
        {
            let docs = self.documents.read().await;
            if let Some(doc) = docs.get(document_id) {
                return (doc.clone(), false);
            }
        }

        let mut docs = self.documents.write().await;
        // Double-check: another task may have created it between the locks.
        if let Some(doc) = docs.get(document_id) {
            return (doc.clone(), false);
        }

        let doc = Arc::new(match seed {
            Some((version, content)) => DocumentLog::with_state(document_id, version, content),
            None => DocumentLog::new(document_id),
        });
        docs.insert(document_id.to_string(), doc.clone());
        tracing::info!("[Sync] Created in-memory log for document {}", document_id);
        (doc, true)
    }

    /// All documents currently in memory.
    pub async fn snapshot(&self) -> Vec<Arc<DocumentLog>> {
        let docs = self.documents.read().await;
        docs.values().cloned().collect()
    }

    /// Remove documents that are safe to evict, returning their ids.
    ///
    /// Candidates are gathered under the read lock, then re-verified under
    /// the write lock so a client that connected in between keeps its
    /// document alive. A handler that fetched the log before the write lock
    /// was taken may still be about to append; its outstanding reference
    /// keeps the document resident until the next pass (with the write lock
    /// held, the map and this loop hold the only other two references).
    pub async fn remove_idle(&self, idle_window: Duration) -> Vec<String> {
        let candidates: Vec<Arc<DocumentLog>> = {
            let docs = self.documents.read().await;
            docs.values().cloned().collect()
        };

        let mut evicted = Vec::new();
        for doc in candidates {
            if !doc.is_evictable(idle_window).await {
                continue;
            }
            let mut docs = self.documents.write().await;
            if doc.is_evictable(idle_window).await && Arc::strong_count(&doc) <= 2 {
                docs.remove(doc.document_id());
                evicted.push(doc.document_id().to_string());
                tracing::info!(
                    "[Persist] Evicted idle document {} from memory",
                    doc.document_id()
                );
            }
        }
        evicted
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        let docs = self.snapshot().await;
        let total_documents = docs.len();
        let mut total_steps = 0;
        let mut total_active_clients = 0;
        for doc in docs {
            let stats = doc.stats().await;
            total_steps += stats.total_steps;
            total_active_clients += stats.connected_clients;
        }
        MemoryStats {
            total_documents,
            total_steps,
            total_active_clients,
            average_steps_per_document: if total_documents > 0 {
                total_steps / total_documents
            } else {
                0
            },
        }
    }
}

fn saturating_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}
