//! Client Connection State Machine
//!
//! A strictly sequential controller that keeps one client in sync with one
//! document. It cycles through four states:
//!
//! - **start** - register presence, then move straight to polling
//! - **poll** - long-poll the server for remote steps; integrate whatever
//!   arrives through the editor transform layer
//! - **send** - a local edit exists; submit the pending steps at the local
//!   version
//! - **recover** - a transport or version error occurred; wait an
//!   exponentially growing backoff (200ms doubling, capped at 6s), then poll
//!
//! # Loop Suppression
//!
//! Local edits arrive over the [`EditorHandle`] channel and are drained only
//! at poll boundaries. While remote steps are being integrated the
//! `receiving` flag is set and a new edit merely buffers; the transition to
//! `send` happens after integration finishes. The machine therefore never
//! re-submits steps it just received.
//!
//! # Conflict Recovery
//!
//! A version-mismatch on submit abandons the submission and returns to
//! polling. The authoritative tail then arrives: steps carrying this client's
//! own id confirm queued steps (the server accepted them before the
//! conflict), foreign steps are integrated and the remaining queue is rebased
//! over them before resubmission. A position error while integrating, or a
//! server-side skip of a submitted payload, abandons the queue entirely and
//! resyncs from version 0.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::transport::{SyncTransport, TransportError};
use crate::shared::protocol::{PullRequest, PullResponse, PushRequest, WireStep};
use crate::shared::transform::{EditorTransform, TransformError};

/// First backoff applied after an error, in milliseconds.
const BASE_BACKOFF_MS: u64 = 200;
/// Backoff ceiling, in milliseconds.
const MAX_BACKOFF_MS: u64 = 6000;

/// The connection's communication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommState {
    Start,
    Poll,
    Send,
    Recover,
}

/// Errors surfaced to the code driving a session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session behind this handle is gone.
    #[error("editor handle closed")]
    HandleClosed,
}

/// Handle the editor uses to feed local edits into a running session.
#[derive(Debug, Clone)]
pub struct EditorHandle {
    tx: mpsc::UnboundedSender<Value>,
}

impl EditorHandle {
    /// Queue one locally produced step payload for submission.
    pub fn submit(&self, payload: Value) -> Result<(), ClientError> {
        self.tx.send(payload).map_err(|_| ClientError::HandleClosed)
    }
}

/// One client's synchronization session with a document.
///
/// The tracked `content` is the synchronized snapshot: it advances only when
/// the server confirms steps, never optimistically. The editor owns whatever
/// optimistic view it wants to show; this machine owns convergence.
pub struct CollabSession {
    transport: Arc<dyn SyncTransport>,
    transform: Arc<dyn EditorTransform>,
    document_id: String,
    client_id: String,
    state: CommState,
    local_version: u64,
    content: Value,
    pending: Vec<Value>,
    receiving: bool,
    /// Set after a version conflict: the authoritative tail must be pulled
    /// and integrated before pending steps may be resubmitted.
    needs_pull: bool,
    backoff_ms: u64,
    edits: mpsc::UnboundedReceiver<Value>,
    edits_closed: bool,
}

enum PollEvent {
    Edit(Option<Value>),
    Pull(Result<PullResponse, TransportError>),
}

impl CollabSession {
    /// Create a session and the handle the editor submits edits through.
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        transform: Arc<dyn EditorTransform>,
        document_id: impl Into<String>,
    ) -> (Self, EditorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            transport,
            transform,
            document_id: document_id.into(),
            client_id: format!("client-{}", Uuid::new_v4()),
            state: CommState::Start,
            local_version: 0,
            content: Value::Null,
            pending: Vec::new(),
            receiving: false,
            needs_pull: false,
            backoff_ms: 0,
            edits: rx,
            edits_closed: false,
        };
        (session, EditorHandle { tx })
    }

    pub fn state(&self) -> CommState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn local_version(&self) -> u64 {
        self.local_version
    }

    /// The synchronized content snapshot.
    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    /// Buffer a local edit directly (the channel-free path, used when the
    /// caller owns the session). Transitions to `send` unless a receive is
    /// being integrated right now.
    pub fn queue_local_edit(&mut self, payload: Value) {
        self.pending.push(payload);
        if self.state == CommState::Poll && !self.receiving && !self.needs_pull {
            self.state = CommState::Send;
        }
    }

    /// Drive the session forever. Intended for `tokio::spawn`; abort the task
    /// to stop the session.
    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }

    /// Execute one state transition.
    pub async fn step(&mut self) {
        match self.state {
            CommState::Start => self.start_once().await,
            CommState::Poll => self.poll_once().await,
            CommState::Send => self.send_once().await,
            CommState::Recover => self.recover_once().await,
        }
    }

    /// Deregister presence. Best-effort: the server also drops presence when
    /// the connection goes away.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.transport
            .disconnect(&self.document_id, &self.client_id)
            .await?;
        Ok(())
    }

    async fn start_once(&mut self) {
        match self
            .transport
            .connect(&self.document_id, &self.client_id)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    "[Client] {} joined document {}",
                    self.client_id,
                    self.document_id
                );
                self.state = CommState::Poll;
            }
            Err(error) => {
                tracing::warn!("[Client] Failed to join {}: {}", self.document_id, error);
                self.state = CommState::Recover;
            }
        }
    }

    async fn poll_once(&mut self) {
        self.drain_edits();
        if !self.pending.is_empty() && !self.receiving && !self.needs_pull {
            self.state = CommState::Send;
            return;
        }

        let request = PullRequest {
            document_id: self.document_id.clone(),
            from_version: self.local_version,
        };

        let event = if self.edits_closed {
            PollEvent::Pull(self.transport.pull(&request).await)
        } else {
            let pull = self.transport.pull(&request);
            tokio::pin!(pull);
            tokio::select! {
                biased;
                edit = self.edits.recv() => PollEvent::Edit(edit),
                result = &mut pull => PollEvent::Pull(result),
            }
        };

        match event {
            PollEvent::Edit(Some(payload)) => {
                // The in-flight pull is abandoned; the edit takes priority.
                self.queue_local_edit(payload);
            }
            PollEvent::Edit(None) => {
                self.edits_closed = true;
            }
            PollEvent::Pull(Ok(response)) => {
                self.backoff_ms = 0;
                self.needs_pull = false;
                self.integrate(response);
            }
            PollEvent::Pull(Err(error)) => {
                tracing::warn!("[Client] Pull failed for {}: {}", self.document_id, error);
                self.state = CommState::Recover;
            }
        }
    }

    /// Integrate remote steps into the synchronized snapshot.
    fn integrate(&mut self, response: PullResponse) {
        self.receiving = true;
        let mut foreign: Vec<WireStep> = Vec::new();

        for step in response.steps {
            if step.version <= self.local_version {
                continue;
            }
            let own = step.client_id == self.client_id;

            match self.transform.apply_step(&self.content, &step.payload) {
                Ok(next) => {
                    self.content = next;
                    self.local_version = step.version;
                    if own {
                        // Echo of a step the server accepted from us before a
                        // conflict cut the batch short: it confirms the queue
                        // head.
                        if !self.pending.is_empty() {
                            self.pending.remove(0);
                        }
                    } else {
                        foreign.push(step);
                    }
                }
                Err(TransformError::Position { message }) => {
                    tracing::warn!(
                        "[Client] Position error integrating version {}: {}",
                        step.version,
                        message
                    );
                    self.request_resync();
                    return;
                }
                Err(TransformError::Malformed { message }) => {
                    tracing::warn!(
                        "[Client] Skipping unappliable remote step {}: {}",
                        step.version,
                        message
                    );
                    self.local_version = step.version;
                }
            }
        }

        if !foreign.is_empty() && !self.pending.is_empty() {
            self.pending = self
                .transform
                .rebase(std::mem::take(&mut self.pending), &foreign);
        }
        self.receiving = false;

        self.state = if self.pending.is_empty() {
            CommState::Poll
        } else {
            CommState::Send
        };
    }

    async fn send_once(&mut self) {
        if self.pending.is_empty() {
            self.state = CommState::Poll;
            return;
        }

        let request = PushRequest {
            document_id: self.document_id.clone(),
            base_version: self.local_version,
            steps: self.pending.clone(),
            client_id: self.client_id.clone(),
        };
        tracing::debug!(
            "[Client] Sending {} step(s) at version {}",
            request.steps.len(),
            request.base_version
        );

        match self.transport.push(&request).await {
            Err(error) => {
                tracing::warn!("[Client] Push failed for {}: {}", self.document_id, error);
                self.state = CommState::Recover;
            }
            Ok(response) if response.accepted => {
                self.backoff_ms = 0;
                if response.skipped > 0 {
                    // The server dropped payloads it could not apply; which
                    // ones is unknowable from here, so fall back to a clean
                    // slate.
                    tracing::warn!(
                        "[Client] Server skipped {} submitted step(s); resyncing",
                        response.skipped
                    );
                    self.request_resync();
                    return;
                }
                for payload in self.pending.drain(..) {
                    if let Ok(next) = self.transform.apply_step(&self.content, &payload) {
                        self.content = next;
                    }
                }
                self.local_version = response.version;
                self.state = CommState::Poll;
            }
            Ok(response) => {
                // Version conflict. The accepted prefix (if any) comes back
                // as echoes on the next pull, which confirms and rebases the
                // queue before we resubmit.
                tracing::debug!(
                    "[Client] Version conflict at {}; authoritative version {}",
                    request.base_version,
                    response.version
                );
                self.needs_pull = true;
                self.state = CommState::Poll;
            }
        }
    }

    async fn recover_once(&mut self) {
        self.backoff_ms = if self.backoff_ms == 0 {
            BASE_BACKOFF_MS * 2
        } else {
            (self.backoff_ms * 2).min(MAX_BACKOFF_MS)
        };
        tracing::debug!("[Client] Recovering in {}ms", self.backoff_ms);
        tokio::time::sleep(Duration::from_millis(self.backoff_ms)).await;
        self.state = CommState::Poll;
    }

    /// Abandon local state and start over from version 0. Pending local
    /// steps are discarded.
    fn request_resync(&mut self) {
        tracing::warn!(
            "[Client] Resyncing document {} from version 0",
            self.document_id
        );
        self.content = Value::Null;
        self.local_version = 0;
        self.pending.clear();
        self.receiving = false;
        self.needs_pull = false;
        self.state = CommState::Poll;
    }

    fn drain_edits(&mut self) {
        while let Ok(payload) = self.edits.try_recv() {
            self.pending.push(payload);
        }
    }
}
