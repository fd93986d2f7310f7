//! Flush, trim, eviction, and durable-reload behavior.

mod common;

use common::{
    coordinator_with_store, insert_step, pull, push, replace_step, CountingStore, FlakyStore,
};
use coscribe::backend::persistence::store::{DurableStore, MemoryStore, SqliteStore};
use coscribe::backend::persistence::{PersistenceConfig, PersistenceWorker};
use coscribe::shared::transform::{EditorTransform, ReplaceTransform};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn eager_config() -> PersistenceConfig {
    PersistenceConfig {
        flush_threshold: Duration::ZERO,
        evict_idle_window: Duration::ZERO,
        ..PersistenceConfig::default()
    }
}

#[tokio::test]
async fn flush_with_no_pending_steps_issues_no_store_call() {
    let store = Arc::new(CountingStore::new());
    let coordinator =
        coordinator_with_store(store.clone(), Duration::from_millis(100));
    // Touch a document without ever writing to it.
    coordinator.connect("doc-1", "client-a").await.unwrap();

    let registry = coordinator.registry();
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    let flushed = PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;

    assert_eq!(flushed, 0);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn flush_persists_and_trims_the_log() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone(), Duration::from_millis(100));

    for round in 0..5u64 {
        coordinator
            .submit_steps(push("doc-1", "client-a", round, vec![insert_step()]))
            .await
            .unwrap();
    }

    let registry = coordinator.registry();
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    let config = PersistenceConfig {
        keep_recent_steps: 2,
        ..eager_config()
    };
    let flushed = PersistenceWorker::flush_once(&registry, &dyn_store, &config).await;
    assert_eq!(flushed, 1);

    // Everything reached the store, the head matches, memory kept the tail.
    assert_eq!(store.load_steps_since("doc-1", 0).await.unwrap().len(), 5);
    assert_eq!(store.load_document("doc-1").await.unwrap().unwrap().version, 5);
    let doc = registry.get("doc-1").await.unwrap();
    let (in_memory, version) = doc.read_since(0).await;
    assert_eq!(version, 5);
    assert_eq!(
        in_memory.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![4, 5]
    );

    // Trimmed history is still served, merged from the durable prefix.
    let full = coordinator.fetch_since(pull("doc-1", 0)).await.unwrap();
    assert_eq!(
        full.steps.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}

#[tokio::test]
async fn failed_durable_write_retries_without_marking() {
    let store = Arc::new(FlakyStore::new());
    let coordinator = coordinator_with_store(store.clone(), Duration::from_millis(100));
    coordinator
        .submit_steps(push("doc-1", "client-a", 0, vec![insert_step()]))
        .await
        .unwrap();

    let registry = coordinator.registry();
    let dyn_store: Arc<dyn DurableStore> = store.clone();

    store.set_failing(true);
    let flushed = PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;
    assert_eq!(flushed, 0);
    // Nothing marked, nothing trimmed: the step is still pending in memory.
    let doc = registry.get("doc-1").await.unwrap();
    assert_eq!(doc.non_durable_steps().await.len(), 1);

    store.set_failing(false);
    let flushed = PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;
    assert_eq!(flushed, 1);
    assert!(doc.non_durable_steps().await.is_empty());
    assert_eq!(store.load_steps_since("doc-1", 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn connected_client_is_never_evicted() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone(), Duration::from_millis(100));
    coordinator.connect("doc-1", "client-a").await.unwrap();

    let worker = PersistenceWorker::new(coordinator.registry(), store, eager_config());
    // The idle window is zero, so only the presence registration keeps it.
    assert!(worker.evict_once().await.is_empty());
    assert!(coordinator.registry().get("doc-1").await.is_some());
}

#[tokio::test]
async fn eviction_then_durable_reload_serves_full_history() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone(), Duration::from_millis(100));

    coordinator.connect("doc-1", "client-a").await.unwrap();
    for round in 0..3u64 {
        coordinator
            .submit_steps(push("doc-1", "client-a", round, vec![insert_step()]))
            .await
            .unwrap();
    }

    let registry = coordinator.registry();
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;

    let worker = PersistenceWorker::new(registry.clone(), dyn_store, eager_config());
    // Still connected: not evictable regardless of the elapsed window.
    assert!(worker.evict_once().await.is_empty());

    coordinator.disconnect("doc-1", "client-a").await.unwrap();
    assert_eq!(worker.evict_once().await, vec!["doc-1".to_string()]);
    assert!(registry.get("doc-1").await.is_none());

    // The next pull transparently reloads from durable storage.
    let full = coordinator.fetch_since(pull("doc-1", 0)).await.unwrap();
    assert_eq!(full.version, 3);
    assert_eq!(
        full.steps.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn durable_replay_reproduces_the_content_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone(), Duration::from_millis(100));

    let steps = vec![
        insert_step(),
        replace_step("title", "meeting notes"),
        insert_step(),
        serde_json::json!({"stepType": "delete", "at": 0}),
    ];
    coordinator
        .submit_steps(push("doc-1", "client-a", 0, steps))
        .await
        .unwrap();

    let registry = coordinator.registry();
    let dyn_store: Arc<dyn DurableStore> = store.clone();
    PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;

    // Replaying every durable step from version 0 through the transform
    // reproduces the live snapshot exactly.
    let transform = ReplaceTransform;
    let mut replayed = Value::Null;
    for step in store.load_steps_since("doc-1", 0).await.unwrap() {
        replayed = transform.apply_step(&replayed, &step.payload).unwrap();
    }

    let live = coordinator.document_state("doc-1").await.unwrap();
    assert_eq!(replayed, live.content);
    assert_eq!(live.version, 4);
}

#[tokio::test]
async fn sqlite_store_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steps.db");
    let url = format!("sqlite://{}", path.display());

    {
        let store = SqliteStore::connect(&url).await.unwrap();
        let coordinator =
            coordinator_with_store(Arc::new(store), Duration::from_millis(100));
        coordinator
            .submit_steps(push("doc-1", "client-a", 0, vec![insert_step(), insert_step()]))
            .await
            .unwrap();
        let registry = coordinator.registry();
        let dyn_store: Arc<dyn DurableStore> =
            Arc::new(SqliteStore::connect(&url).await.unwrap());
        PersistenceWorker::flush_once(&registry, &dyn_store, &eager_config()).await;
    }

    // A fresh process sees the same history.
    let reopened = SqliteStore::connect(&url).await.unwrap();
    let head = reopened.load_document("doc-1").await.unwrap().unwrap();
    assert_eq!(head.version, 2);
    assert_eq!(reopened.load_steps_since("doc-1", 0).await.unwrap().len(), 2);
}
