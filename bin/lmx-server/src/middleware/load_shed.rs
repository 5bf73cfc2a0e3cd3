//! Axum glue around [`lmx_core::LoadShedder`]'s decision logic.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn shed_under_pressure(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(usage_percent) = state.load_shedder.should_shed(req.uri().path()) {
        tracing::warn!(usage_percent, path = req.uri().path(), "shedding request under memory pressure");
        let mut response = (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(lmx_core::LoadShedder::http_rejection_body()),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&lmx_core::LoadShedder::HTTP_RETRY_AFTER_SECS.to_string()) {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
        return response;
    }
    next.run(req).await
}
