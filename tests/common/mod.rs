//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coscribe::backend::persistence::store::{
    DurableStore, MemoryStore, PersistedDocument, StoreError,
};
use coscribe::backend::sync::log::DocumentRegistry;
use coscribe::backend::sync::SyncCoordinator;
use coscribe::client::transport::{SyncTransport, TransportError};
use coscribe::shared::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use coscribe::shared::step::StepRecord;
use coscribe::shared::transform::ReplaceTransform;

/// Coordinator over an in-memory store with a short long-poll bound.
pub fn coordinator_with_store(
    store: Arc<dyn DurableStore>,
    long_poll_timeout: Duration,
) -> Arc<SyncCoordinator> {
    Arc::new(SyncCoordinator::new(
        Arc::new(DocumentRegistry::new()),
        Arc::new(ReplaceTransform),
        store,
        long_poll_timeout,
    ))
}

pub fn coordinator() -> Arc<SyncCoordinator> {
    coordinator_with_store(Arc::new(MemoryStore::new()), Duration::from_millis(200))
}

/// A step payload that appends one paragraph node.
pub fn insert_step() -> Value {
    json!({"stepType": "insert", "node": {"type": "paragraph"}})
}

/// A step payload that merges a field into the document root.
pub fn replace_step(key: &str, value: &str) -> Value {
    json!({"stepType": "replace", "slice": {key: value}})
}

pub fn push(document_id: &str, client_id: &str, base: u64, steps: Vec<Value>) -> PushRequest {
    PushRequest {
        document_id: document_id.to_string(),
        base_version: base,
        steps,
        client_id: client_id.to_string(),
    }
}

pub fn pull(document_id: &str, from: u64) -> PullRequest {
    PullRequest {
        document_id: document_id.to_string(),
        from_version: from,
    }
}

/// In-process transport driving a coordinator directly, so client sessions
/// can be tested without a socket.
pub struct LocalTransport {
    coordinator: Arc<SyncCoordinator>,
}

impl LocalTransport {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        self.coordinator
            .submit_steps(request.clone())
            .await
            .map_err(|e| TransportError::request(e.to_string()))
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError> {
        self.coordinator
            .fetch_since(request.clone())
            .await
            .map_err(|e| TransportError::request(e.to_string()))
    }

    async fn connect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError> {
        self.coordinator
            .connect(document_id, client_id)
            .await
            .map_err(|e| TransportError::request(e.to_string()))
    }

    async fn disconnect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError> {
        self.coordinator
            .disconnect(document_id, client_id)
            .await
            .map_err(|e| TransportError::request(e.to_string()))
    }
}

/// Store wrapper that counts writes, for asserting flush no-ops.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub inserts: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst) + self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for CountingStore {
    async fn insert_steps(&self, document_id: &str, steps: &[StepRecord]) -> Result<(), StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_steps(document_id, steps).await
    }

    async fn upsert_document(
        &self,
        document_id: &str,
        version: u64,
        content: &Value,
    ) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_document(document_id, version, content).await
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<PersistedDocument>, StoreError> {
        self.inner.load_document(document_id).await
    }

    async fn load_steps_since(
        &self,
        document_id: &str,
        from_version: u64,
    ) -> Result<Vec<StepRecord>, StoreError> {
        self.inner.load_steps_since(document_id, from_version).await
    }
}

/// Store whose writes fail on demand, for exercising durability retries.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn insert_steps(&self, document_id: &str, steps: &[StepRecord]) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_steps(document_id, steps).await
    }

    async fn upsert_document(
        &self,
        document_id: &str,
        version: u64,
        content: &Value,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert_document(document_id, version, content).await
    }

    async fn load_document(&self, document_id: &str) -> Result<Option<PersistedDocument>, StoreError> {
        self.inner.load_document(document_id).await
    }

    async fn load_steps_since(
        &self,
        document_id: &str,
        from_version: u64,
    ) -> Result<Vec<StepRecord>, StoreError> {
        self.inner.load_steps_since(document_id, from_version).await
    }
}
