//! Server Initialization
//!
//! Wires the pieces together: durable store, document registry, sync
//! coordinator, persistence worker, and the axum router.
//!
//! # Initialization Steps
//!
//! 1. Open the durable store (SQLite, or in-memory when unconfigured)
//! 2. Create the document registry and the sync coordinator over it
//! 3. Start the persistence worker's flush and eviction timers
//! 4. Build the router with request tracing
//!
//! The returned [`PersistenceWorker`] owns the background tasks; the caller
//! keeps it alive for the lifetime of the server (dropping it aborts both
//! timers, which is exactly what tests want).

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::backend::persistence::PersistenceWorker;
use crate::backend::server::config::{load_store, ServerConfig};
use crate::backend::server::state::AppState;
use crate::backend::sync::handlers;
use crate::backend::sync::log::DocumentRegistry;
use crate::backend::sync::SyncCoordinator;
use crate::shared::transform::{EditorTransform, ReplaceTransform};

/// Build the full application with the default JSON transform.
pub async fn create_app(config: ServerConfig) -> (Router, Arc<SyncCoordinator>, PersistenceWorker) {
    create_app_with_transform(config, Arc::new(ReplaceTransform)).await
}

/// Build the application around a caller-supplied editor transform.
pub async fn create_app_with_transform(
    config: ServerConfig,
    transform: Arc<dyn EditorTransform>,
) -> (Router, Arc<SyncCoordinator>, PersistenceWorker) {
    tracing::info!("[Server] Initializing sync server");

    let store = load_store(&config).await;
    let registry = Arc::new(DocumentRegistry::new());

    let coordinator = Arc::new(SyncCoordinator::new(
        registry.clone(),
        transform,
        store.clone(),
        config.long_poll_timeout(),
    ));

    let mut worker = PersistenceWorker::new(registry, store, config.persistence());
    worker.start();

    let state = AppState {
        coordinator: coordinator.clone(),
        config: Arc::new(config),
    };

    let router = create_router(state);
    tracing::info!("[Server] Router configured");
    (router, coordinator, worker)
}

/// All routes, layered with request tracing.
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/docs/{doc_id}", get(handlers::document_state))
        .route(
            "/api/docs/{doc_id}/steps",
            post(handlers::push_steps).get(handlers::pull_steps),
        )
        .route("/api/docs/{doc_id}/presence", post(handlers::presence))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
