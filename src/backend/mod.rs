//! Server-side code: the sync engine, its HTTP layer, and the background
//! persistence jobs.
//!
//! # Modules
//!
//! - **`sync`** - step log store, sync coordinator, long-poll registry, and
//!   the axum handlers in front of them
//! - **`persistence`** - durable storage contract and the timer-driven
//!   flush/eviction worker
//! - **`server`** - configuration, shared state, and app assembly
//! - **`error`** - HTTP-layer error types

pub mod error;
pub mod persistence;
pub mod server;
pub mod sync;
