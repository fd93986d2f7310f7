//! Client-side sync engine: the connection state machine and the transport
//! seam it drives.
//!
//! The editor embedding this module feeds local edits through an
//! [`EditorHandle`] and reads the synchronized snapshot off the session; the
//! session handles polling, submission, conflict recovery, and backoff.

pub mod connection;
pub mod transport;

pub use connection::{ClientError, CollabSession, CommState, EditorHandle};
pub use transport::{HttpTransport, SyncTransport, TransportError};
