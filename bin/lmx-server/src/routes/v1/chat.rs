//! OpenAI-compatible chat completions (`POST /v1/chat/completions`).
//!
//! When `session_id` is set, the user turn and the assistant reply are both
//! appended to the session bridge so a subsequent call can resume the
//! conversation by resubmitting the accumulated message list.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use lmx_types::{ChatMessage, ChatRole, GenerationParams, GenerationRequest};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    /// Non-standard: when set, the session bridge persists this turn under
    /// this id and the id is echoed back unchanged.
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: ChatCompletionUsage,
    pub session_id: Option<Uuid>,
}

fn parse_role(role: &str) -> ChatRole {
    match role {
        "system" => ChatRole::System,
        "assistant" => ChatRole::Assistant,
        "tool" => ChatRole::Tool,
        _ => ChatRole::User,
    }
}

fn to_internal_messages(messages: &[WireMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage {
            role: parse_role(&m.role),
            content: m.content.clone(),
        })
        .collect()
}

async fn persist_turn(
    state: &AppState,
    session_id: Uuid,
    user_message: Option<&ChatMessage>,
    assistant_content: &str,
) {
    if let Some(user_message) = user_message {
        if let Err(e) = state.sessions.append_message(session_id, user_message.clone()).await {
            tracing::warn!(error = %e, "failed to persist user message");
        }
    }
    let assistant = ChatMessage {
        role: ChatRole::Assistant,
        content: assistant_content.to_string(),
    };
    if let Err(e) = state.sessions.append_message(session_id, assistant).await {
        tracing::warn!(error = %e, "failed to persist assistant message");
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ServerError> {
    if req.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".to_string()));
    }

    let messages = to_internal_messages(&req.messages);
    let last_user = messages.iter().rev().find(|m| matches!(m.role, ChatRole::User)).cloned();

    let generation_request = GenerationRequest {
        model_id: req.model.clone(),
        messages,
        params: GenerationParams {
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop: req.stop.clone(),
            stream: req.stream,
        },
        client_id: req.client_id.clone().unwrap_or_else(|| "anonymous".to_string()),
    };

    if req.stream {
        let rx = state.generator.stream(generation_request).await?;
        let state_for_persist = Arc::clone(&state);
        let session_id = req.session_id;
        let last_user_for_persist = last_user.clone();

        let collected = Arc::new(std::sync::Mutex::new(String::new()));
        let collected_for_stream = Arc::clone(&collected);

        let body_stream = ReceiverStream::new(rx).map(move |chunk| {
            if let Some(delta) = &chunk.delta_content {
                collected_for_stream.lock().expect("collected mutex poisoned").push_str(delta);
            }
            let data = serde_json::json!({
                "delta": chunk.delta_content,
                "finish_reason": chunk.finish_reason,
            })
            .to_string();
            Ok::<Event, Infallible>(Event::default().data(data))
        });

        let done_stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
            if let Some(session_id) = session_id {
                Box::pin(body_stream.chain(stream::once(async move {
                    let assistant_content = collected.lock().expect("collected mutex poisoned").clone();
                    persist_turn(&state_for_persist, session_id, last_user_for_persist.as_ref(), &assistant_content).await;
                    Ok(Event::default().data("[DONE]"))
                })))
            } else {
                Box::pin(body_stream.chain(stream::once(async { Ok(Event::default().data("[DONE]")) })))
            };

        return Ok(Sse::new(done_stream).keep_alive(KeepAlive::default()).into_response());
    }

    let response = state.generator.generate(generation_request).await?;

    if let Some(session_id) = req.session_id {
        persist_turn(&state, session_id, last_user.as_ref(), &response.content).await;
    }

    let body = ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: req.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: "assistant",
                content: response.content,
            },
            finish_reason: response.finish_reason,
        }],
        usage: ChatCompletionUsage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        },
        session_id: req.session_id,
    };

    Ok(Json(body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_role_defaults_unknown_to_user() {
        assert!(matches!(parse_role("weird"), ChatRole::User));
        assert!(matches!(parse_role("system"), ChatRole::System));
    }
}
