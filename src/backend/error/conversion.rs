//! Error Conversion
//!
//! Lets handlers return `BackendError` directly: the error becomes a JSON
//! response of the form `{"error": "...", "status": 409}` with the matching
//! HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::backend::error::types::BackendError;

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("[Server] Internal error serving request: {}", message);
        }

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::error::SyncError;

    #[test]
    fn test_conflict_response_status() {
        let response = BackendError::from(SyncError::conflict(1)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
