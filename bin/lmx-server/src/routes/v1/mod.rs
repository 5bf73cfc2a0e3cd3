//! Routes nested under `/v1` (OpenAI-compatible + supplemental resources).

pub mod agents;
pub mod chat;
pub mod downloads;
pub mod embeddings;
pub mod models;
pub mod sessions;
pub mod skills;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Inference-key auth is applied by the caller (`routes::build`) once a
/// concrete `Arc<AppState>` is available to pass into
/// `middleware::from_fn_with_state`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(embeddings::router())
        .merge(models::router())
        .merge(sessions::router())
        .merge(agents::router())
        .merge(skills::router())
        .merge(downloads::router())
}
