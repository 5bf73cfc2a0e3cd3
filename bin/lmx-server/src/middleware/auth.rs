//! API-key checks for the admin surface and the inference surface.
//!
//! Both are no-ops when the corresponding config key is unset, so a
//! single-user local install needs no configuration at all.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::state::AppState;

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": {
                "message": "invalid or missing API key",
                "type": "invalid_request_error",
                "param": serde_json::Value::Null,
                "code": "unauthorized",
            }
        })),
    )
        .into_response()
}

/// Checks `X-Admin-Key` against `config.admin_api_key`. No-op if unset.
pub async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.admin_api_key {
        let provided = req
            .headers()
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return unauthorized();
        }
    }
    next.run(req).await
}

/// Checks `Authorization: Bearer <key>` or `X-Api-Key` against
/// `config.inference_api_key`. No-op if unset.
pub async fn require_inference_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.inference_api_key {
        let bearer = req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let api_key_header = req
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        let provided = bearer.or(api_key_header);
        if provided != Some(expected.as_str()) {
            return unauthorized();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_response_has_401_status() {
        let response = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
