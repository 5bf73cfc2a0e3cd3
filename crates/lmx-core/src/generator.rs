//! C10 — `Generator`: resolves a model, acquires admission, dispatches to
//! the backend, and publishes completion/failure events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lmx_types::{
    Backend as BackendKind, GenerationRequest, GenerationResponse, ServerEvent, StreamChunk,
};
use tokio::sync::mpsc;
use tracing::warn;

use crate::admission::AdmissionScheduler;
use crate::error::RuntimeError;
use crate::event_bus::EventBus;
use crate::lifecycle::ModelLifecycle;
use crate::metrics::MetricsCollector;

/// One concrete inference engine implementation, keyed by [`BackendKind`] in
/// [`Generator`]. Every model routed to a given backend kind shares that
/// backend's engine instance — mirroring the teacher's single
/// `ggml.llama` worker serving every request against that engine.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, String>;

    /// Begin a streaming generation; chunks are pushed to the returned
    /// channel until the backend closes it. Backend-side errors are sent
    /// as the final item before the channel closes, per the SSE framing
    /// contract the caller applies on top.
    async fn stream(&self, request: &GenerationRequest) -> mpsc::Receiver<Result<StreamChunk, String>>;
}

/// Per-call timeout applied to `generate`/`stream` dispatch, independent of
/// the admission scheduler's own `semaphore_timeout_sec`.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Generator {
    lifecycle: Arc<ModelLifecycle>,
    admission: Arc<AdmissionScheduler>,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
    backends: HashMap<BackendKind, Arc<dyn InferenceBackend>>,
    call_timeout: Duration,
    auto_load: bool,
}

impl Generator {
    pub fn new(
        lifecycle: Arc<ModelLifecycle>,
        admission: Arc<AdmissionScheduler>,
        events: EventBus,
        metrics: Arc<MetricsCollector>,
        backends: HashMap<BackendKind, Arc<dyn InferenceBackend>>,
        auto_load: bool,
    ) -> Self {
        Self {
            lifecycle,
            admission,
            events,
            metrics,
            backends,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            auto_load,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn resolve_backend(&self, model_id: &str) -> Result<(BackendKind, Arc<dyn InferenceBackend>), RuntimeError> {
        let loaded = match self.lifecycle.get(model_id).await {
            Some(loaded) => loaded,
            None if self.auto_load => self
                .lifecycle
                .load(model_id, Default::default())
                .await?,
            None => return Err(RuntimeError::ModelNotFound(model_id.to_string())),
        };
        let backend = self
            .backends
            .get(&loaded.backend)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal(format!("no engine registered for backend {}", loaded.backend)))?;
        Ok((loaded.backend, backend))
    }

    /// Non-streaming generation. Always releases admission gates and
    /// decrements in-flight on every exit path, including early error
    /// returns, since both are RAII-scoped to this function's stack.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, RuntimeError> {
        let (backend_kind, backend) = self.resolve_backend(&request.model_id).await?;
        let backend_tag = backend_kind.as_tag();

        let _permit = self
            .admission
            .acquire(&request.model_id, backend_tag, &request.client_id)
            .await?;

        self.lifecycle.begin_generation(&request.model_id).await?;
        let started = Instant::now();

        let result = tokio::time::timeout(self.call_timeout, backend.generate(&request)).await;

        self.lifecycle.end_generation(&request.model_id).await;
        self.lifecycle.touch(&request.model_id).await;
        self.metrics.incr_requests_total();

        match result {
            Ok(Ok(response)) => {
                let elapsed = started.elapsed();
                self.metrics.record_generation(&request.model_id, backend_tag, true);
                if response.usage.total_tokens > 0 && elapsed.as_secs_f64() > 0.0 {
                    self.metrics.observe_tokens_per_second(
                        &request.model_id,
                        backend_tag,
                        response.usage.total_tokens as f64 / elapsed.as_secs_f64(),
                    );
                }
                self.metrics.observe_request_latency(elapsed.as_secs_f64());
                self.publish_generation_event("generation_completed", &request.model_id, None)
                    .await;
                Ok(response)
            }
            Ok(Err(message)) => {
                self.metrics.record_generation(&request.model_id, backend_tag, false);
                self.publish_generation_event(
                    "generation_failed",
                    &request.model_id,
                    Some(&message),
                )
                .await;
                Err(RuntimeError::Internal(message))
            }
            Err(_) => {
                self.metrics.record_generation(&request.model_id, backend_tag, false);
                let message = "generation timed out".to_string();
                self.publish_generation_event(
                    "generation_failed",
                    &request.model_id,
                    Some(&message),
                )
                .await;
                Err(RuntimeError::Internal(message))
            }
        }
    }

    /// Streaming generation. The returned channel yields SSE-ready chunks;
    /// the final item is always either a normal close (no explicit
    /// terminator item — caller appends `[DONE]`) or one error chunk whose
    /// `delta_content` carries the error text, per the mid-stream-exception
    /// contract in the specification. Admission is released only once the
    /// backend's channel closes, by moving `_permit` into the forwarding
    /// task.
    pub async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, RuntimeError> {
        let (backend_kind, backend) = self.resolve_backend(&request.model_id).await?;
        let backend_tag = backend_kind.as_tag().to_string();

        let permit = self
            .admission
            .acquire(&request.model_id, &backend_tag, &request.client_id)
            .await?;
        self.lifecycle.begin_generation(&request.model_id).await?;

        let mut upstream = backend.stream(&request).await;
        let (tx, rx) = mpsc::channel(32);

        let lifecycle = Arc::clone(&self.lifecycle);
        let events = self.events.clone();
        let metrics = Arc::clone(&self.metrics);
        let model_id = request.model_id.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let mut succeeded = true;
            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(chunk) => {
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(message) => {
                        succeeded = false;
                        let _ = tx
                            .send(StreamChunk {
                                delta_content: Some(message.clone()),
                                finish_reason: Some("stop".to_string()),
                            })
                            .await;
                        warn!(model_id, error = message, "stream generation failed mid-stream");
                        break;
                    }
                }
            }
            lifecycle.end_generation(&model_id).await;
            lifecycle.touch(&model_id).await;
            metrics.incr_requests_total();
            metrics.record_generation(&model_id, "stream", succeeded);
            let mut data = HashMap::new();
            data.insert("model_id".to_string(), serde_json::json!(model_id));
            let event_type = if succeeded {
                "generation_completed"
            } else {
                "generation_failed"
            };
            events.publish(ServerEvent::new(event_type, data)).await;
        });

        Ok(rx)
    }

    async fn publish_generation_event(&self, event_type: &str, model_id: &str, error: Option<&str>) {
        let mut data = HashMap::new();
        data.insert("model_id".to_string(), serde_json::json!(model_id));
        if let Some(error) = error {
            data.insert("error".to_string(), serde_json::json!(error));
        }
        self.events.publish(ServerEvent::new(event_type, data)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderProtocol;
    use crate::memory::MemoryMonitor;
    use crate::registry::CompatibilityRegistry;
    use lmx_types::{ChatRole, LoadResult, LoadSpec, LoaderFailure, TokenUsage};

    struct AlwaysOkLoader;

    #[async_trait]
    impl LoaderProtocol for AlwaysOkLoader {
        async fn load(&self, spec: LoadSpec) -> Result<LoadResult, LoaderFailure> {
            Ok(LoadResult {
                ok: true,
                backend: spec.backend,
                reason: None,
                telemetry: Default::default(),
            })
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, String> {
            Ok(GenerationResponse {
                content: format!("echo:{}", request.messages.last().map(|m| m.content.clone()).unwrap_or_default()),
                finish_reason: "stop".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
            })
        }

        async fn stream(&self, _request: &GenerationRequest) -> mpsc::Receiver<Result<StreamChunk, String>> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(StreamChunk {
                        delta_content: Some("hi".to_string()),
                        finish_reason: None,
                    }))
                    .await;
                let _ = tx
                    .send(Ok(StreamChunk {
                        delta_content: None,
                        finish_reason: Some("stop".to_string()),
                    }))
                    .await;
            });
            rx
        }
    }

    async fn generator() -> Generator {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryMonitor::new(95.0).unwrap());
        let registry = Arc::new(CompatibilityRegistry::open(dir.path().join("r.json")).await);
        let events = EventBus::new();
        let metrics = Arc::new(MetricsCollector::new());
        let lifecycle = Arc::new(ModelLifecycle::new(
            memory,
            registry,
            events.clone(),
            Arc::clone(&metrics),
            Arc::new(AlwaysOkLoader),
            Duration::from_secs(300),
            true,
            None,
        ));
        let admission = Arc::new(AdmissionScheduler::new(
            10,
            10,
            HashMap::new(),
            Duration::from_secs(5),
            Arc::clone(&metrics),
        ));
        let mut backends: HashMap<BackendKind, Arc<dyn InferenceBackend>> = HashMap::new();
        backends.insert(BackendKind::Gguf, Arc::new(EchoBackend));
        backends.insert(BackendKind::MlxLm, Arc::new(EchoBackend));
        backends.insert(BackendKind::VllmMlx, Arc::new(EchoBackend));
        Generator::new(lifecycle, admission, events, metrics, backends, true)
    }

    fn request(model_id: &str) -> GenerationRequest {
        GenerationRequest {
            model_id: model_id.to_string(),
            messages: vec![lmx_types::ChatMessage {
                role: ChatRole::User,
                content: "hello".to_string(),
            }],
            params: Default::default(),
            client_id: "client-a".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_auto_loads_and_returns_response() {
        let generator = generator().await;
        let response = generator.generate(request("model-a")).await.unwrap();
        assert_eq!(response.content, "echo:hello");
    }

    #[tokio::test]
    async fn stream_yields_chunks_then_closes() {
        let generator = generator().await;
        let mut rx = generator.stream(request("model-a")).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.delta_content.as_deref(), Some("hi"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.finish_reason.as_deref(), Some("stop"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn missing_model_without_auto_load_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryMonitor::new(95.0).unwrap());
        let registry = Arc::new(CompatibilityRegistry::open(dir.path().join("r.json")).await);
        let events = EventBus::new();
        let metrics = Arc::new(MetricsCollector::new());
        let lifecycle = Arc::new(ModelLifecycle::new(
            memory,
            registry,
            events.clone(),
            Arc::clone(&metrics),
            Arc::new(AlwaysOkLoader),
            Duration::from_secs(300),
            true,
            None,
        ));
        let admission = Arc::new(AdmissionScheduler::new(
            10,
            10,
            HashMap::new(),
            Duration::from_secs(5),
            Arc::clone(&metrics),
        ));
        let backends: HashMap<BackendKind, Arc<dyn InferenceBackend>> = HashMap::new();
        let generator = Generator::new(lifecycle, admission, events, metrics, backends, false);
        let err = generator.generate(request("model-a")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound(_)));
    }
}
