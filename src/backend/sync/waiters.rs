//! Long-Poll Waiter Registry
//!
//! A pull that finds no new steps does not block its connection: it parks a
//! waiter here and suspends on a oneshot channel. The sync coordinator
//! delivers every waiter for a document when new steps are accepted; a waiter
//! whose timeout elapses first is resolved by its caller with an empty result
//! instead.
//!
//! Waiters are strictly one-shot (registered -> delivered | expired) and are
//! indexed by document id, so an update to one document can never wake a
//! waiter parked on another.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::shared::protocol::{PullResponse, WireStep};
use crate::shared::step::StepRecord;

/// Opaque handle identifying one registered waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterId(u64);

struct Waiter {
    id: WaiterId,
    since_version: u64,
    registered_at: Instant,
    tx: oneshot::Sender<PullResponse>,
}

/// Registry of parked pull requests, keyed by document id.
///
/// The inner mutex is a plain `std::sync::Mutex`: it is never held across an
/// await point, on either the registration or the delivery path.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
    next_id: Mutex<u64>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter for `document_id` that already has `since_version`.
    ///
    /// The caller must re-check the document's version after registering:
    /// an append that raced the caller's emptiness check may already have
    /// drained the registry before this waiter was added.
    pub fn register(
        &self,
        document_id: &str,
        since_version: u64,
    ) -> (WaiterId, oneshot::Receiver<PullResponse>) {
        let id = {
            let mut next = self.next_id.lock().expect("waiter id lock poisoned");
            *next += 1;
            WaiterId(*next)
        };
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.waiters.lock().expect("waiter registry lock poisoned");
        let entry = waiters.entry(document_id.to_string()).or_default();
        // Drop waiters whose callers already went away (timed out or hung up).
        entry.retain(|waiter| !waiter.tx.is_closed());
        entry.push(Waiter {
            id,
            since_version,
            registered_at: Instant::now(),
            tx,
        });
        (id, rx)
    }

    /// Remove a waiter that resolved some other way (timeout, or steps turned
    /// out to be available after registration).
    pub fn remove(&self, document_id: &str, id: WaiterId) {
        let mut waiters = self.waiters.lock().expect("waiter registry lock poisoned");
        if let Some(entry) = waiters.get_mut(document_id) {
            entry.retain(|waiter| waiter.id != id);
            if entry.is_empty() {
                waiters.remove(document_id);
            }
        }
    }

    /// Deliver newly accepted steps to every waiter for the document and
    /// remove them. Each waiter receives only the steps newer than the
    /// version it reported having.
    pub fn deliver(&self, document_id: &str, steps: &[StepRecord], version: u64) {
        let drained = {
            let mut waiters = self.waiters.lock().expect("waiter registry lock poisoned");
            waiters.remove(document_id)
        };
        let Some(drained) = drained else {
            return;
        };

        for waiter in drained {
            let visible: Vec<WireStep> = steps
                .iter()
                .filter(|step| step.version > waiter.since_version)
                .map(WireStep::from)
                .collect();
            let waited = waiter.registered_at.elapsed();
            if waiter
                .tx
                .send(PullResponse {
                    steps: visible,
                    version,
                })
                .is_err()
            {
                tracing::debug!(
                    "[Sync] Waiter for document {} hung up after {:?}",
                    document_id,
                    waited
                );
            }
        }
    }

    /// Number of waiters currently parked for a document.
    pub fn count(&self, document_id: &str) -> usize {
        let waiters = self.waiters.lock().expect("waiter registry lock poisoned");
        waiters.get(document_id).map_or(0, Vec::len)
    }
}
