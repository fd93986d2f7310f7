//! Backend Error Module
//!
//! Error types for the HTTP layer and their conversions:
//!
//! - **`types`** - error definitions, constructors, and status-code mapping
//! - **`conversion`** - `IntoResponse` so handlers return errors directly

pub mod conversion;
pub mod types;

pub use types::BackendError;
