//! `POST /v1/downloads`, `GET /v1/downloads/{id}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use lmx_fetch::DownloadTask;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloads", post(start_download))
        .route("/downloads/{id}", get(get_download))
}

#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub repo_id: String,
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_revision() -> String {
    "main".to_string()
}

#[derive(Debug, Serialize)]
pub struct StartDownloadResponse {
    pub download_id: Uuid,
}

pub async fn start_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartDownloadRequest>,
) -> Json<StartDownloadResponse> {
    let download_id = state.downloads.start(req.repo_id, req.revision).await;
    Json(StartDownloadResponse { download_id })
}

pub async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DownloadTask>, ServerError> {
    Ok(Json(state.downloads.status(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_defaults_to_main() {
        let req: StartDownloadRequest = serde_json::from_str(r#"{"repo_id": "org/model"}"#).unwrap();
        assert_eq!(req.revision, "main");
    }
}
