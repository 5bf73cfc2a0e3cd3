//! Concrete [`InferenceBackend`] implementations.
//!
//! The orchestration core treats the actual model math as an opaque
//! capability (see `SPEC_FULL.md` §1); what it needs from `lmx-server` is one
//! object per [`BackendKind`] that can `generate`/`stream` against whatever
//! already-running engine process serves that backend locally — `vllm-mlx`,
//! `mlx-lm`, and `llama.cpp`-style `gguf` servers all expose an
//! OpenAI-compatible `/v1/chat/completions` endpoint, so one HTTP-proxying
//! implementation covers every backend kind; only the configured base URL
//! differs per kind.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lmx_core::InferenceBackend;
use lmx_types::{ChatRole, GenerationRequest, GenerationResponse, StreamChunk, TokenUsage};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

/// Forwards a generation request to a locally running OpenAI-compatible
/// engine server, mirroring the helper fabric's plain `reqwest::Client` use
/// (see `lmx-core::helper_fabric`) and the chunked-stream reading idiom in
/// `lmx-fetch::run_download`.
pub struct HttpProxyBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProxyBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn body(request: &GenerationRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();
        json!({
            "model": request.model_id,
            "messages": messages,
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "max_tokens": request.params.max_tokens,
            "stop": request.params.stop,
            "stream": stream,
        })
    }
}

fn parse_chat_response(body: &Value) -> Result<GenerationResponse, String> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| "upstream response missing choices[0]".to_string())?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .unwrap_or("stop")
        .to_string();
    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        })
        .unwrap_or_default();
    Ok(GenerationResponse {
        content,
        finish_reason,
        usage,
    })
}

/// Parse one SSE `data: {...}` line of an OpenAI-compatible stream into a
/// chunk. Returns `None` for the `[DONE]` terminator or a blank keep-alive
/// line.
fn parse_sse_data_line(line: &str) -> Option<Result<StreamChunk, String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(format!("malformed upstream SSE frame: {e}"))),
    };
    let delta = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string);
    let finish_reason = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .and_then(|f| f.as_str())
        .map(str::to_string);
    Some(Ok(StreamChunk {
        delta_content: delta,
        finish_reason,
    }))
}

#[async_trait]
impl InferenceBackend for HttpProxyBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, String> {
        let response = self
            .client
            .post(self.chat_completions_url())
            .json(&Self::body(request, false))
            .send()
            .await
            .map_err(|e| format!("upstream request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("upstream returned an error status: {e}"))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("upstream response was not valid JSON: {e}"))?;
        parse_chat_response(&body)
    }

    async fn stream(&self, request: &GenerationRequest) -> mpsc::Receiver<Result<StreamChunk, String>> {
        let (tx, rx) = mpsc::channel(32);
        let url = self.chat_completions_url();
        let body = Self::body(request, true);
        let client = self.client.clone();

        tokio::spawn(async move {
            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(format!("upstream request failed: {e}"))).await;
                    return;
                }
            };
            if let Err(e) = response.error_for_status_ref() {
                let _ = tx.send(Err(format!("upstream returned an error status: {e}"))).await;
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(format!("upstream stream read failed: {e}"))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(idx) = buffer.find('\n') {
                    let line = buffer[..idx].trim_end_matches('\r').to_string();
                    buffer.drain(..=idx);
                    if let Some(result) = parse_sse_data_line(&line) {
                        let is_err = result.is_err();
                        if tx.send(result).await.is_err() || is_err {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Echoes the last user message back as the assistant reply, with no
/// network dependency. Used when no upstream base URL is configured for a
/// backend kind, so the server stays usable for integration testing and
/// small deployments that have no real engine process running yet.
pub struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, String> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ChatRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(GenerationResponse {
            content: format!("echo:{last_user}"),
            finish_reason: "stop".to_string(),
            usage: TokenUsage {
                prompt_tokens: last_user.split_whitespace().count() as u32,
                completion_tokens: last_user.split_whitespace().count() as u32,
                total_tokens: (last_user.split_whitespace().count() * 2) as u32,
            },
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> mpsc::Receiver<Result<StreamChunk, String>> {
        let (tx, rx) = mpsc::channel(8);
        let response = self.generate(request).await;
        tokio::spawn(async move {
            match response {
                Ok(r) => {
                    for word in r.content.split_whitespace() {
                        if tx
                            .send(Ok(StreamChunk {
                                delta_content: Some(format!("{word} ")),
                                finish_reason: None,
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Ok(StreamChunk {
                            delta_content: None,
                            finish_reason: Some("stop".to_string()),
                        }))
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "echo backend generation failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmx_types::GenerationParams;

    fn request(content: &str) -> GenerationRequest {
        GenerationRequest {
            model_id: "model-a".to_string(),
            messages: vec![lmx_types::ChatMessage {
                role: ChatRole::User,
                content: content.to_string(),
            }],
            params: GenerationParams::default(),
            client_id: "client-a".to_string(),
        }
    }

    #[tokio::test]
    async fn echo_backend_echoes_last_user_message() {
        let backend = EchoBackend;
        let response = backend.generate(&request("hello there")).await.unwrap();
        assert_eq!(response.content, "echo:hello there");
    }

    #[tokio::test]
    async fn echo_backend_stream_ends_with_stop() {
        let backend = EchoBackend;
        let mut rx = backend.stream(&request("a b")).await;
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_sse_data_line_extracts_delta_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#;
        let chunk = parse_sse_data_line(line).unwrap().unwrap();
        assert_eq!(chunk.delta_content.as_deref(), Some("hi"));
    }

    #[test]
    fn parse_sse_data_line_done_terminator_yields_none() {
        assert!(parse_sse_data_line("data: [DONE]").is_none());
    }

    #[test]
    fn parse_chat_response_reads_content_and_usage() {
        let body = json!({
            "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3},
        });
        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.usage.total_tokens, 3);
    }
}
