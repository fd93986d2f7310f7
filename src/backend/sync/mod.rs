//! # Document Synchronization
//!
//! The server-side sync engine:
//!
//! - **`log`** - the step log store: per-document version counter, content
//!   snapshot, contiguous step window, and the process-scoped registry
//! - **`coordinator`** - push/pull/presence operations over the log,
//!   optimistic concurrency enforcement, broadcast fan-out
//! - **`waiters`** - the long-poll registry for pulls that found nothing new
//! - **`handlers`** - axum handlers carrying the wire contracts

pub mod coordinator;
pub mod handlers;
pub mod log;
pub mod waiters;

pub use coordinator::SyncCoordinator;
pub use log::{AppendOutcome, DocumentLog, DocumentRegistry, StepBroadcast};
pub use waiters::WaiterRegistry;
