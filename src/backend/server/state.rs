//! Application State
//!
//! The central state container handed to every axum handler. It is
//! deliberately small: handlers never hold document state themselves, they
//! dispatch into the [`SyncCoordinator`], whose per-document locking is the
//! only concurrency story the handlers need.
//!
//! `FromRef` implementations let handlers extract just the part of the state
//! they use, following axum's recommended pattern.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::backend::server::config::ServerConfig;
use crate::backend::sync::coordinator::SyncCoordinator;

/// Shared state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    /// The sync coordinator serving every document operation
    pub coordinator: Arc<SyncCoordinator>,
    /// The server configuration the app was built with
    pub config: Arc<ServerConfig>,
}

impl FromRef<AppState> for Arc<SyncCoordinator> {
    fn from_ref(state: &AppState) -> Self {
        state.coordinator.clone()
    }
}

impl FromRef<AppState> for Arc<ServerConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
