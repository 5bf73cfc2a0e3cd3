//! Session bridge HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServerError;
use crate::sessions::Session;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/search", get(search_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Session>>, ServerError> {
    Ok(Json(state.sessions.list().await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Session>>, ServerError> {
    Ok(Json(state.sessions.search(&query.q).await?))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ServerError> {
    Ok(Json(state.sessions.get(id).await?))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(), ServerError> {
    state.sessions.delete(id).await?;
    Ok(())
}
