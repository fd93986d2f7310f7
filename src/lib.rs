//! Coscribe - Collaborative Document Sync Engine
//!
//! Coscribe keeps any number of concurrent editors converged on one document
//! state. The server holds an authoritative, version-ordered log of edit
//! operations ("steps") per document; clients push steps optimistically and
//! pull the steps they are missing, long-polling when they are current.
//! Accepted steps are flushed to durable storage in the background, and idle
//! documents are evicted from memory without losing history.
//!
//! # Module Structure
//!
//! - **`shared`** - wire contracts, step types, the editor transform seam,
//!   and the shared error taxonomy
//! - **`backend`** - the axum server: step log store, sync coordinator,
//!   long-poll registry, persistence worker
//! - **`client`** - the connection state machine and its transport seam
//!
//! # Guarantees
//!
//! - Steps for a document form one total order; versions advance by exactly
//!   one per accepted step and are never reused.
//! - A submit at a stale version is rejected with the authoritative version;
//!   no client work is lost, the client rebases and resubmits.
//! - An accepted step is never dropped from memory before it is durable.
//! - A long-polled pull always resolves within the configured bound.

pub mod backend;
pub mod client;
pub mod shared;
