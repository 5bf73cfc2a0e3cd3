//! Agent-run submission and inspection (`/v1/agents/runs`).
//!
//! Execution itself happens in the background workers started by
//! `RunScheduler::start` in `main.rs`; these handlers only submit and read.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use lmx_types::AgentRun;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/runs", post(submit_run).get(list_runs))
        .route("/agents/runs/{id}", get(get_run))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    pub request: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub idempotency_key: Option<String>,
}

fn default_priority() -> String {
    "normal".to_string()
}

pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRunRequest>,
) -> Result<Json<AgentRun>, ServerError> {
    let run = state
        .run_scheduler
        .submit(req.request, &req.priority, req.idempotency_key)
        .await?;
    Ok(Json(run))
}

pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<AgentRun>> {
    Json(state.run_scheduler.list().await)
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgentRun>, ServerError> {
    state
        .run_scheduler
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::Runtime(lmx_core::RuntimeError::RunNotFound(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_defaults_to_normal() {
        let req: SubmitRunRequest = serde_json::from_str(r#"{"request": {}}"#).unwrap();
        assert_eq!(req.priority, "normal");
    }
}
