//! C8 — `ModelLifecycle`: the model id → loaded-engine table and its load,
//! unload, eviction, and crash-recovery operations.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lmx_types::{Backend, LoadSpec, LoadedModel, ModelConfig, ModelId, Outcome, ServerEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend_policy;
use crate::error::RuntimeError;
use crate::event_bus::EventBus;
use crate::loader::LoaderProtocol;
use crate::memory::MemoryMonitor;
use crate::metrics::MetricsCollector;
use crate::registry::CompatibilityRegistry;

/// Fallback resident-memory estimate, in GB, used for the admission
/// precheck when a model's config does not supply one. Deliberately
/// conservative: better to occasionally evict more than necessary than to
/// let an under-estimated load push the process past the memory ceiling.
const DEFAULT_ESTIMATED_MEMORY_GB: f64 = 4.0;

/// Optional per-call overrides for [`ModelLifecycle::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOverrides {
    pub config: Option<ModelConfig>,
    pub estimated_memory_gb: Option<f64>,
    pub batching: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RuntimeStateFile {
    last_clean_shutdown: bool,
    loaded_models: Vec<ModelId>,
}

/// Owns the table of resident models and serializes load/unload/eviction
/// against it.
///
/// At most one load per model id runs at a time (tracked in `loading`); a
/// second concurrent `load` for the same id fails fast with
/// [`RuntimeError::AlreadyLoading`] rather than queuing, since the spec
/// defines no queuing semantics for duplicate load requests.
pub struct ModelLifecycle {
    models: RwLock<HashMap<ModelId, LoadedModel>>,
    loading: RwLock<HashSet<ModelId>>,
    memory: Arc<MemoryMonitor>,
    registry: Arc<CompatibilityRegistry>,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
    loader: Arc<dyn LoaderProtocol>,
    default_keep_alive: Duration,
    gguf_fallback_enabled: bool,
    allow_failed_backends: bool,
    runtime_state_path: Option<PathBuf>,
}

impl ModelLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory: Arc<MemoryMonitor>,
        registry: Arc<CompatibilityRegistry>,
        events: EventBus,
        metrics: Arc<MetricsCollector>,
        loader: Arc<dyn LoaderProtocol>,
        default_keep_alive: Duration,
        gguf_fallback_enabled: bool,
        runtime_state_path: Option<PathBuf>,
    ) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            loading: RwLock::new(HashSet::new()),
            memory,
            registry,
            events,
            metrics,
            loader,
            default_keep_alive,
            gguf_fallback_enabled,
            allow_failed_backends: false,
            runtime_state_path,
        }
    }

    pub async fn is_loaded(&self, model_id: &str) -> bool {
        self.models.read().await.contains_key(model_id)
    }

    pub async fn get(&self, model_id: &str) -> Option<LoadedModel> {
        self.models.read().await.get(model_id).cloned()
    }

    pub async fn list(&self) -> Vec<LoadedModel> {
        self.models.read().await.values().cloned().collect()
    }

    pub async fn touch(&self, model_id: &str) {
        if let Some(entry) = self.models.write().await.get_mut(model_id) {
            entry.last_used = Instant::now();
            entry.request_count += 1;
        }
    }

    /// Mark one generation as in flight; callers must pair this with
    /// [`Self::end_generation`] even on error paths.
    pub async fn begin_generation(&self, model_id: &str) -> Result<(), RuntimeError> {
        let mut models = self.models.write().await;
        let entry = models
            .get_mut(model_id)
            .ok_or_else(|| RuntimeError::ModelNotFound(model_id.to_string()))?;
        entry.in_flight += 1;
        Ok(())
    }

    pub async fn end_generation(&self, model_id: &str) {
        if let Some(entry) = self.models.write().await.get_mut(model_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// Load `model_id`, trying backend candidates in [`backend_policy`]
    /// order until one succeeds or all fail.
    pub async fn load(
        &self,
        model_id: &str,
        overrides: LoadOverrides,
    ) -> Result<LoadedModel, RuntimeError> {
        if let Some(existing) = self.get(model_id).await {
            return Ok(existing);
        }

        {
            let mut loading = self.loading.write().await;
            if !loading.insert(model_id.to_string()) {
                return Err(RuntimeError::AlreadyLoading(model_id.to_string()));
            }
        }
        let _guard = LoadingGuard {
            lifecycle: self,
            model_id: model_id.to_string(),
        };

        let config = overrides.config.clone().unwrap_or_default();
        let estimated_gb = overrides
            .estimated_memory_gb
            .unwrap_or(DEFAULT_ESTIMATED_MEMORY_GB);

        self.ensure_memory_available(model_id, estimated_gb).await?;

        let candidates = backend_policy::candidates(
            model_id,
            &config,
            &self.registry,
            self.gguf_fallback_enabled,
            self.allow_failed_backends,
        )
        .await;

        let mut last_failure = None;
        for backend_tag in &candidates {
            let spec = LoadSpec {
                model_id: model_id.to_string(),
                backend: backend_tag.clone(),
                batching: overrides.batching,
                performance_overrides: config.performance_overrides.clone(),
                probe_only: false,
            };

            match self.loader.load(spec).await {
                Ok(result) if result.ok => {
                    self.registry
                        .record(
                            model_id.to_string(),
                            backend_tag.clone(),
                            "unknown".to_string(),
                            Outcome::Pass,
                            None,
                        )
                        .await;

                    let backend = Backend::parse(backend_tag).unwrap_or(Backend::Gguf);
                    let loaded = LoadedModel {
                        model_id: model_id.to_string(),
                        backend,
                        loaded_at: Instant::now(),
                        last_used: Instant::now(),
                        request_count: 0,
                        estimated_memory_gb: estimated_gb,
                        context_length: config.context_length,
                        performance_overrides: config.performance_overrides.clone(),
                        keep_alive_secs: config.keep_alive_secs,
                        speculative: Default::default(),
                        batching: overrides.batching,
                        in_flight: 0,
                    };
                    self.models
                        .write()
                        .await
                        .insert(model_id.to_string(), loaded.clone());
                    self.metrics
                        .set_loaded_models(self.models.read().await.len() as u64);

                    info!(model_id, backend = backend_tag, "model loaded");
                    self.publish_model_event("model_loaded", model_id, backend_tag, None)
                        .await;
                    return Ok(loaded);
                }
                Ok(result) => {
                    let reason = result.reason.unwrap_or_else(|| "unknown".to_string());
                    self.record_and_publish_failure(model_id, backend_tag, &reason)
                        .await;
                    last_failure = Some(reason);
                }
                Err(failure) => {
                    self.record_and_publish_failure(model_id, backend_tag, &failure.message)
                        .await;
                    last_failure = Some(format!("[{}] {}", failure.code, failure.message));
                }
            }
        }

        Err(RuntimeError::AllBackendsFailed {
            model_id: model_id.to_string(),
            cause: lmx_types::LoaderFailure {
                code: "all_backends_failed".to_string(),
                message: last_failure.unwrap_or_else(|| "no candidate backends".to_string()),
                exit_code: None,
                signal: None,
                metadata: Default::default(),
            },
        })
    }

    async fn record_and_publish_failure(&self, model_id: &str, backend: &str, reason: &str) {
        self.registry
            .record(
                model_id.to_string(),
                backend.to_string(),
                "unknown".to_string(),
                Outcome::Fail,
                Some(reason.to_string()),
            )
            .await;
        warn!(model_id, backend, reason, "backend candidate failed to load");
        self.publish_model_event("model_load_failed", model_id, backend, Some(reason))
            .await;
    }

    async fn publish_model_event(
        &self,
        event_type: &str,
        model_id: &str,
        backend: &str,
        reason: Option<&str>,
    ) {
        let mut data = HashMap::new();
        data.insert("model_id".to_string(), serde_json::json!(model_id));
        data.insert("backend".to_string(), serde_json::json!(backend));
        if let Some(reason) = reason {
            data.insert("reason".to_string(), serde_json::json!(reason));
        }
        self.events.publish(ServerEvent::new(event_type, data)).await;
    }

    pub async fn unload(&self, model_id: &str) -> Result<bool, RuntimeError> {
        let mut models = self.models.write().await;
        let Some(entry) = models.get(model_id) else {
            return Ok(false);
        };
        if !entry.is_idle() {
            return Err(RuntimeError::ModelInUse(model_id.to_string()));
        }
        models.remove(model_id);
        drop(models);
        self.metrics
            .set_loaded_models(self.models.read().await.len() as u64);
        info!(model_id, "model unloaded");
        self.publish_model_event("model_unloaded", model_id, "", None)
            .await;
        Ok(true)
    }

    /// Evict LRU-ordered idle entries older than their keep-alive until
    /// `estimated_gb` worth of headroom opens up or no candidate remains.
    async fn ensure_memory_available(
        &self,
        model_id: &str,
        estimated_gb: f64,
    ) -> Result<(), RuntimeError> {
        if self.memory.can_load(estimated_gb) {
            return Ok(());
        }

        loop {
            let victim = {
                let models = self.models.read().await;
                models
                    .values()
                    .filter(|m| m.is_idle())
                    .filter(|m| self.is_past_keep_alive(m))
                    .min_by_key(|m| m.last_used)
                    .map(|m| m.model_id.clone())
            };

            let Some(victim_id) = victim else {
                return Err(RuntimeError::InsufficientMemory {
                    model_id: model_id.to_string(),
                    needed_gb: estimated_gb,
                });
            };

            info!(model_id = %victim_id, "evicting idle model to free memory");
            self.metrics.incr_evictions_total();
            let _ = self.unload(&victim_id).await;

            if self.memory.can_load(estimated_gb) {
                return Ok(());
            }
        }
    }

    fn is_past_keep_alive(&self, model: &LoadedModel) -> bool {
        match model.keep_alive_secs {
            Some(0) => false,
            Some(secs) => model.last_used.elapsed() >= Duration::from_secs(secs),
            None => model.last_used.elapsed() >= self.default_keep_alive,
        }
    }

    /// Read the runtime-state file (if configured) and re-load any model
    /// that was resident at last observation if the prior shutdown was not
    /// clean. Individual load failures are logged, not propagated — a
    /// single bad entry must not block the rest of startup.
    pub async fn restore(&self) {
        let Some(path) = &self.runtime_state_path else {
            return;
        };

        let previous = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<RuntimeStateFile>(&bytes).ok(),
            Err(_) => None,
        };

        self.write_state_file(false, &[]).await;

        let Some(previous) = previous else {
            return;
        };
        if previous.last_clean_shutdown {
            return;
        }

        let mut seen = HashSet::new();
        for model_id in previous.loaded_models {
            if !seen.insert(model_id.clone()) {
                continue;
            }
            if let Err(e) = self.load(&model_id, LoadOverrides::default()).await {
                warn!(model_id, error = %e, "failed to restore model after unclean shutdown");
            }
        }
    }

    /// Persist `last_clean_shutdown=true` with the currently loaded model
    /// ids. Called from the server's graceful-shutdown path.
    pub async fn mark_clean_shutdown(&self) {
        let ids: Vec<ModelId> = self.models.read().await.keys().cloned().collect();
        self.write_state_file(true, &ids).await;
    }

    async fn write_state_file(&self, last_clean_shutdown: bool, loaded_models: &[ModelId]) {
        let Some(path) = &self.runtime_state_path else {
            return;
        };
        let state = RuntimeStateFile {
            last_clean_shutdown,
            loaded_models: loaded_models.to_vec(),
        };
        let Ok(encoded) = serde_json::to_vec_pretty(&state) else {
            return;
        };
        let tmp_path = path.with_extension("tmp");
        if tokio::fs::write(&tmp_path, &encoded).await.is_ok() {
            let _ = tokio::fs::rename(&tmp_path, path).await;
        }
    }
}

struct LoadingGuard<'a> {
    lifecycle: &'a ModelLifecycle,
    model_id: ModelId,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle;
        let model_id = self.model_id.clone();
        tokio::spawn(async move {
            lifecycle.loading.write().await.remove(&model_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lmx_types::{LoadResult, LoaderFailure};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLoader {
        fail_backends: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LoaderProtocol for FakeLoader {
        async fn load(&self, spec: LoadSpec) -> Result<LoadResult, LoaderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_backends.contains(&spec.backend) {
                return Err(LoaderFailure::crashed(Some(1), None, "boom".into()));
            }
            Ok(LoadResult {
                ok: true,
                backend: spec.backend,
                reason: None,
                telemetry: Default::default(),
            })
        }
    }

    async fn lifecycle_with(fail_backends: Vec<String>) -> ModelLifecycle {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryMonitor::new(95.0).unwrap());
        let registry = Arc::new(CompatibilityRegistry::open(dir.path().join("r.json")).await);
        let events = EventBus::new();
        let metrics = Arc::new(MetricsCollector::new());
        let loader = Arc::new(FakeLoader {
            fail_backends,
            calls: AtomicUsize::new(0),
        });
        ModelLifecycle::new(
            memory,
            registry,
            events,
            metrics,
            loader,
            Duration::from_secs(300),
            true,
            None,
        )
    }

    #[tokio::test]
    async fn load_succeeds_and_is_idempotent() {
        let lifecycle = lifecycle_with(vec![]).await;
        let first = lifecycle.load("model-a", LoadOverrides::default()).await.unwrap();
        let second = lifecycle.load("model-a", LoadOverrides::default()).await.unwrap();
        assert_eq!(first.model_id, second.model_id);
        assert_eq!(lifecycle.list().await.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_next_backend_on_failure() {
        let lifecycle = lifecycle_with(vec!["vllm-mlx".to_string()]).await;
        let loaded = lifecycle.load("model-a", LoadOverrides::default()).await.unwrap();
        assert_eq!(loaded.backend, Backend::MlxLm);
    }

    #[tokio::test]
    async fn all_backends_failing_reports_all_backends_failed() {
        let lifecycle = lifecycle_with(vec!["vllm-mlx".to_string(), "mlx-lm".to_string()]).await;
        let err = lifecycle.load("model-a", LoadOverrides::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AllBackendsFailed { .. }));
    }

    #[tokio::test]
    async fn unload_of_in_use_model_fails() {
        let lifecycle = lifecycle_with(vec![]).await;
        lifecycle.load("model-a", LoadOverrides::default()).await.unwrap();
        lifecycle.begin_generation("model-a").await.unwrap();
        let err = lifecycle.unload("model-a").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ModelInUse(_)));
        lifecycle.end_generation("model-a").await;
        assert!(lifecycle.unload("model-a").await.unwrap());
    }

    #[tokio::test]
    async fn unload_of_unknown_model_returns_false_not_error() {
        let lifecycle = lifecycle_with(vec![]).await;
        assert!(!lifecycle.unload("nope").await.unwrap());
    }
}
