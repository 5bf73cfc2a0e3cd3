//! `POST /admin/models/{id}/load`, `POST /admin/models/{id}/unload`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use lmx_core::LoadOverrides;
use serde::Serialize;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models/{id}/load", post(load_model))
        .route("/models/{id}/unload", post(unload_model))
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub model_id: String,
    pub backend: String,
}

pub async fn load_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LoadResponse>, ServerError> {
    let loaded = state.lifecycle.load(&id, LoadOverrides::default()).await?;
    Ok(Json(LoadResponse {
        model_id: loaded.model_id,
        backend: loaded.backend.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct UnloadResponse {
    pub unloaded: bool,
}

pub async fn unload_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UnloadResponse>, ServerError> {
    let unloaded = state.lifecycle.unload(&id).await?;
    Ok(Json(UnloadResponse { unloaded }))
}
