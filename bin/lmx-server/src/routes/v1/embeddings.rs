//! `POST /v1/embeddings`.
//!
//! No embedding-capable engine is wired into this build — every configured
//! backend kind here is a chat-completion proxy — so a well-formed request
//! against a known model still resolves to `embedding_unavailable`. Input
//! validation runs first so a malformed request gets the right 4xx instead
//! of a blanket 503.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/embeddings", post(create_embeddings))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    fn is_empty(&self) -> bool {
        match self {
            EmbeddingInput::One(s) => s.is_empty(),
            EmbeddingInput::Many(v) => v.is_empty() || v.iter().all(|s| s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(default)]
    pub encoding_format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub model: String,
}

pub async fn create_embeddings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbeddingsRequest>,
) -> Result<Json<EmbeddingsResponse>, ServerError> {
    if req.input.is_empty() {
        return Err(ServerError::BadRequest("input must not be empty".to_string()));
    }
    if state.lifecycle.get(&req.model).await.is_none() {
        return Err(ServerError::NotFound(format!("model {}", req.model)));
    }
    Err(ServerError::EmbeddingUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_input_empty_detection() {
        assert!(EmbeddingInput::One(String::new()).is_empty());
        assert!(EmbeddingInput::Many(vec![]).is_empty());
        assert!(!EmbeddingInput::One("hi".to_string()).is_empty());
    }
}
