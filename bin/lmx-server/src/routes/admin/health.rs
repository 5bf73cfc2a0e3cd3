//! `GET /admin/health` — operator-facing health, distinct from `/healthz`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(admin_health))
}

pub async fn admin_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let usage_percent = state.memory.usage_percent();
    let status = if usage_percent > 95.0 { "degraded" } else { "ok" };
    Json(json!({ "status": status }))
}
