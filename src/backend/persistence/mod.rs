//! # Background Persistence
//!
//! Two timer-driven jobs keep the in-memory step logs bounded without ever
//! touching the request-serving path:
//!
//! - **Flush**: batch-writes not-yet-durable steps to the durable store,
//!   marks them durable, and trims old durable steps out of memory.
//! - **Eviction**: drops documents with no connected clients and a long idle
//!   window from memory entirely; the durable copy remains the source of
//!   truth and reloads on the next touch.
//!
//! Both jobs run on independent `tokio::time::interval` timers and talk to
//! the step log only through its public mutation contract. A failed durable
//! write is logged and retried on the next tick; the affected steps are
//! neither marked durable nor trimmed, so an accepted edit is never lost to a
//! lagging store.

pub mod store;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::backend::sync::log::DocumentRegistry;
use self::store::DurableStore;

/// Cadence and retention settings for the background jobs.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// How often the flush job runs
    pub flush_interval: Duration,
    /// How long a document must be quiet before its steps are flushed
    pub flush_threshold: Duration,
    /// How many recent steps stay in memory after a trim
    pub keep_recent_steps: usize,
    /// How often the eviction job runs
    pub evict_interval: Duration,
    /// How long a document must be idle (and clientless) before eviction
    pub evict_idle_window: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            flush_threshold: Duration::from_secs(10),
            keep_recent_steps: 100,
            evict_interval: Duration::from_secs(300),
            evict_idle_window: Duration::from_secs(1800),
        }
    }
}

/// Owns the two background tasks. Dropping the worker aborts them.
pub struct PersistenceWorker {
    registry: Arc<DocumentRegistry>,
    store: Arc<dyn DurableStore>,
    config: PersistenceConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        store: Arc<dyn DurableStore>,
        config: PersistenceConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            tasks: Vec::new(),
        }
    }

    /// Spawn the flush and eviction loops on their own timers.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let registry = self.registry.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.flush_interval);
            loop {
                interval.tick().await;
                let flushed = Self::flush_once(&registry, &store, &config).await;
                if flushed > 0 {
                    tracing::debug!("[Persist] Flush cycle wrote {} document(s)", flushed);
                }
            }
        }));

        let registry = self.registry.clone();
        let config = self.config.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.evict_interval);
            loop {
                interval.tick().await;
                let evicted = registry.remove_idle(config.evict_idle_window).await;
                if !evicted.is_empty() {
                    tracing::info!(
                        "[Persist] Evicted {} inactive document(s) from memory",
                        evicted.len()
                    );
                }
            }
        }));

        tracing::info!(
            "[Persist] Background jobs started (flush every {:?}, eviction every {:?})",
            self.config.flush_interval,
            self.config.evict_interval
        );
    }

    /// Stop the background tasks.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Run one flush pass over every in-memory document. Returns how many
    /// documents had steps written.
    ///
    /// Per document: collect the non-durable steps, write them and the head
    /// snapshot to the store, then mark durable and trim. If either write
    /// fails nothing is marked, so the next pass retries the same batch; the
    /// store's insert is idempotent, so a retry after a half-applied failure
    /// cannot duplicate steps. A document with zero non-durable steps issues
    /// no store call at all.
    pub async fn flush_once(
        registry: &Arc<DocumentRegistry>,
        store: &Arc<dyn DurableStore>,
        config: &PersistenceConfig,
    ) -> usize {
        let mut flushed = 0;
        for doc in registry.snapshot().await {
            if !doc.needs_flush(config.flush_threshold).await {
                continue;
            }
            let pending = doc.non_durable_steps().await;
            if pending.is_empty() {
                continue;
            }

            let document_id = doc.document_id().to_string();
            if let Err(error) = store.insert_steps(&document_id, &pending).await {
                tracing::error!(
                    "[Persist] Failed to write {} step(s) for document {}: {}",
                    pending.len(),
                    document_id,
                    error
                );
                continue;
            }

            let version = doc.version().await;
            let content = doc.content().await;
            if let Err(error) = store.upsert_document(&document_id, version, &content).await {
                tracing::error!(
                    "[Persist] Failed to update stored head for document {}: {}",
                    document_id,
                    error
                );
                continue;
            }

            let versions: Vec<u64> = pending.iter().map(|step| step.version).collect();
            doc.mark_durable(&versions).await;
            doc.trim(config.keep_recent_steps).await;

            tracing::debug!(
                "[Persist] Persisted {} step(s) for document {} (now at version {})",
                versions.len(),
                document_id,
                version
            );
            flushed += 1;
        }
        flushed
    }

    /// Run one eviction pass. Returns the evicted document ids.
    pub async fn evict_once(&self) -> Vec<String> {
        self.registry.remove_idle(self.config.evict_idle_window).await
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
