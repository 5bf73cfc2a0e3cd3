//! Read-only model inventory (`GET /v1/models`, `GET /v1/models/{id}`).
//!
//! Mutating load/unload lives under `/admin` since it changes resident
//! process state, not just queries it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/{id}", get(get_model))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub backend: String,
    pub context_length: Option<u32>,
    pub request_count: u64,
}

fn to_model_info(loaded: lmx_types::LoadedModel) -> ModelInfo {
    ModelInfo {
        id: loaded.model_id,
        object: "model",
        backend: loaded.backend.to_string(),
        context_length: loaded.context_length,
        request_count: loaded.request_count,
    }
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelInfo>> {
    let loaded = state.lifecycle.list().await;
    Json(loaded.into_iter().map(to_model_info).collect())
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ModelInfo>, ServerError> {
    state
        .lifecycle
        .get(&id)
        .await
        .map(to_model_info)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("model {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmx_types::Backend;
    use std::collections::HashMap;
    use std::time::Instant;

    #[test]
    fn to_model_info_carries_backend_and_context_length() {
        let loaded = lmx_types::LoadedModel {
            model_id: "m".to_string(),
            backend: Backend::VllmMlx,
            loaded_at: Instant::now(),
            last_used: Instant::now(),
            request_count: 3,
            estimated_memory_gb: 8.0,
            context_length: Some(4096),
            performance_overrides: HashMap::new(),
            keep_alive_secs: None,
            speculative: Default::default(),
            batching: false,
            in_flight: 0,
        };
        let info = to_model_info(loaded);
        assert_eq!(info.id, "m");
        assert_eq!(info.backend, "vllm-mlx");
        assert_eq!(info.context_length, Some(4096));
        assert_eq!(info.request_count, 3);
    }
}
