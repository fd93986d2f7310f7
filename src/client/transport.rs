//! Client Transport Seam
//!
//! The connection state machine talks to the server through the
//! [`SyncTransport`] trait, keeping the machine itself transport-agnostic.
//! [`HttpTransport`] is the production implementation over the server's HTTP
//! routes; tests drive the machine with an in-process transport wrapping a
//! coordinator directly.

use async_trait::async_trait;
use thiserror::Error;

use crate::shared::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

/// Errors from the transport layer. All of them are recoverable: the state
/// machine backs off and retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never completed (connection refused, dropped, timed out).
    #[error("request failed: {message}")]
    Request { message: String },

    /// The server answered with an unexpected status.
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl TransportError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::request(err.to_string()),
        }
    }
}

/// The operations a sync client needs from its transport.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Submit a step batch.
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError>;

    /// Fetch steps newer than the request's version. May long-poll.
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError>;

    /// Fire-and-forget presence registration.
    async fn connect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError>;

    /// Fire-and-forget presence removal.
    async fn disconnect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError>;
}

/// HTTP transport over the server's `/api` routes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for a server at `base_url`
    /// (e.g. `http://127.0.0.1:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn steps_url(&self, document_id: &str) -> String {
        format!("{}/api/docs/{}/steps", self.base_url, document_id)
    }

    fn presence_url(&self, document_id: &str) -> String {
        format!("{}/api/docs/{}/presence", self.base_url, document_id)
    }

    async fn send_presence(
        &self,
        document_id: &str,
        client_id: &str,
        connected: bool,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.presence_url(document_id))
            .json(&crate::shared::protocol::PresenceUpdate {
                client_id: client_id.to_string(),
                connected,
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        let response = self
            .http
            .post(self.steps_url(&request.document_id))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError> {
        let response = self
            .http
            .get(self.steps_url(&request.document_id))
            .query(&[("from", request.from_version)])
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn connect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError> {
        self.send_presence(document_id, client_id, true).await
    }

    async fn disconnect(&self, document_id: &str, client_id: &str) -> Result<(), TransportError> {
        self.send_presence(document_id, client_id, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_stripped() {
        let transport = HttpTransport::new("http://localhost:3000///");
        assert_eq!(
            transport.steps_url("doc-1"),
            "http://localhost:3000/api/docs/doc-1/steps"
        );
    }

    #[test]
    fn test_presence_url_shape() {
        let transport = HttpTransport::new("http://localhost:3000");
        assert_eq!(
            transport.presence_url("doc-1"),
            "http://localhost:3000/api/docs/doc-1/presence"
        );
    }
}
