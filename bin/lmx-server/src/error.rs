//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted to
//! the OpenAI-style `{"error": {...}}` JSON envelope with an appropriate
//! HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lmx_core::RuntimeError;
use serde_json::json;
use thiserror::Error;

/// All errors that can occur in the `lmx-server` request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from `lmx-core`'s orchestration engine.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Propagated from a sqlx-backed store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request was well-formed but semantically invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The load shedder rejected the request under memory pressure.
    #[error("server overloaded")]
    Overloaded,

    /// A download id was not found.
    #[error("download not found: {0}")]
    DownloadNotFound(uuid::Uuid),

    /// The embedding backend is not configured/available.
    #[error("embedding backend unavailable")]
    EmbeddingUnavailable,

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<crate::sessions::SessionError> for ServerError {
    fn from(e: crate::sessions::SessionError) -> Self {
        match e {
            crate::sessions::SessionError::NotFound(id) => ServerError::NotFound(format!("session {id}")),
            crate::sessions::SessionError::Io(message) => ServerError::Internal(message),
        }
    }
}

impl From<lmx_fetch::DownloadError> for ServerError {
    fn from(e: lmx_fetch::DownloadError) -> Self {
        match e {
            lmx_fetch::DownloadError::NotFound(id) => ServerError::DownloadNotFound(id),
        }
    }
}

/// One `(status, type, code)` triple per the taxonomy in the error-handling
/// design section; `message` is filled in per call site.
fn classify(err: &ServerError) -> (StatusCode, &'static str, &'static str) {
    match err {
        ServerError::Runtime(RuntimeError::ModelNotFound(_)) => {
            (StatusCode::NOT_FOUND, "invalid_request_error", "model_not_found")
        }
        ServerError::Runtime(RuntimeError::AlreadyLoading(_)) => {
            (StatusCode::CONFLICT, "invalid_request_error", "model_in_use")
        }
        ServerError::Runtime(RuntimeError::ModelInUse(_)) => {
            (StatusCode::CONFLICT, "invalid_request_error", "model_in_use")
        }
        ServerError::Runtime(RuntimeError::InsufficientMemory { .. }) => (
            StatusCode::INSUFFICIENT_STORAGE,
            "invalid_request_error",
            "insufficient_memory",
        ),
        ServerError::Runtime(RuntimeError::ProbeFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, "server_error", "model_load_failed")
        }
        ServerError::Runtime(RuntimeError::AllBackendsFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, "server_error", "model_load_failed")
        }
        ServerError::Runtime(RuntimeError::AdmissionTimeout { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "server_error",
            "admission_timeout",
        ),
        ServerError::Runtime(RuntimeError::Busy { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error", "overloaded")
        }
        ServerError::Runtime(RuntimeError::QueueFull { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error", "overloaded")
        }
        ServerError::Runtime(RuntimeError::RunNotFound(_)) => {
            (StatusCode::NOT_FOUND, "invalid_request_error", "run_not_found")
        }
        ServerError::Runtime(RuntimeError::CircuitOpen(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error", "overloaded")
        }
        ServerError::Runtime(RuntimeError::HelperTransport(_)) => {
            (StatusCode::BAD_GATEWAY, "server_error", "server_error")
        }
        ServerError::Runtime(RuntimeError::Registry(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error")
        }
        ServerError::Runtime(RuntimeError::Cancelled) => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error", "overloaded")
        }
        ServerError::Runtime(RuntimeError::Internal(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error")
        }
        ServerError::Database(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error")
        }
        ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "not_found"),
        ServerError::BadRequest(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_input")
        }
        ServerError::InvalidRequest(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_request_error",
            "invalid_input",
        ),
        ServerError::Overloaded => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error", "overloaded")
        }
        ServerError::DownloadNotFound(_) => {
            (StatusCode::NOT_FOUND, "invalid_request_error", "download_not_found")
        }
        ServerError::EmbeddingUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "server_error",
            "embedding_unavailable",
        ),
        ServerError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error")
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = classify(&self);
        // `internal_error` is sanitized: the detailed cause is logged by the
        // tracing span that wraps this request, never echoed to the client.
        let message = if code == "internal_error" {
            tracing::error!(error = %self, "internal error");
            "an internal error occurred".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(json!({
                "error": {
                    "message": message,
                    "type": error_type,
                    "param": serde_json::Value::Null,
                    "code": code,
                }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_maps_to_404() {
        let err = ServerError::Runtime(RuntimeError::ModelNotFound("m".to_string()));
        let (status, _, code) = classify(&err);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "model_not_found");
    }

    #[test]
    fn admission_timeout_maps_to_503() {
        let err = ServerError::Runtime(RuntimeError::AdmissionTimeout { waited_ms: 10 });
        let (status, _, code) = classify(&err);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "admission_timeout");
    }

    #[test]
    fn insufficient_memory_maps_to_507() {
        let err = ServerError::Runtime(RuntimeError::InsufficientMemory {
            model_id: "m".to_string(),
            needed_gb: 8.0,
        });
        let (status, _, code) = classify(&err);
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(code, "insufficient_memory");
    }
}
