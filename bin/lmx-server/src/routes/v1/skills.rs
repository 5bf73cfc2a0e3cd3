//! `/v1/skills` and `/v1/skills/{name}/invoke`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use lmx_types::{GenerationParams, GenerationRequest};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::skills;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/skills", get(list_skills))
        .route("/skills/{name}/invoke", post(invoke_skill))
}

#[derive(Debug, Serialize)]
pub struct SkillInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub async fn list_skills() -> Json<Vec<SkillInfo>> {
    Json(
        skills::SKILLS
            .iter()
            .map(|s| SkillInfo {
                name: s.name,
                description: s.description,
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct InvokeSkillRequest {
    pub model: String,
    pub input: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvokeSkillResponse {
    pub output: String,
    pub finish_reason: String,
}

pub async fn invoke_skill(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<InvokeSkillRequest>,
) -> Result<Json<InvokeSkillResponse>, ServerError> {
    let skill = skills::find(&name).ok_or_else(|| ServerError::NotFound(format!("skill {name}")))?;

    let request = GenerationRequest {
        model_id: req.model,
        messages: skill.build_messages(&req.input),
        params: GenerationParams::default(),
        client_id: req.client_id.unwrap_or_else(|| "anonymous".to_string()),
    };

    let response = state.generator.generate(request).await?;
    Ok(Json(InvokeSkillResponse {
        output: response.content,
        finish_reason: response.finish_reason,
    }))
}
