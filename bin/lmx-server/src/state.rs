//! Shared application state injected into every Axum handler.
//!
//! `AppState::build` wires together every `lmx-core`/`lmx-fetch` component
//! from one [`Config`], mirroring the teacher's `main.rs` step 5 ("shared
//! application state") but pulled into its own constructor since this
//! server's state graph is considerably larger than the teacher's
//! `{config, store, task_manager}` triple.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lmx_core::{
    AdmissionScheduler, ChildLoader, CompatibilityRegistry, EventBus, Generator, HelperFabric,
    InferenceBackend, LoadShedder, MemoryMonitor, MetricsCollector, ModelLifecycle, RunScheduler,
};
use lmx_core::run_scheduler::{InMemoryRunStore, RunStore, SqliteRunStore};
use lmx_fetch::DownloadManager;
use lmx_types::Backend as BackendKind;

use crate::backends::{EchoBackend, HttpProxyBackend};
use crate::config::{Config, RunStoreBackend};
use crate::downloads::HfRepoResolver;
use crate::sessions::SessionStore;

/// State shared across all HTTP handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub memory: Arc<MemoryMonitor>,
    pub registry: Arc<CompatibilityRegistry>,
    pub events: EventBus,
    pub metrics: Arc<MetricsCollector>,
    pub lifecycle: Arc<ModelLifecycle>,
    pub admission: Arc<AdmissionScheduler>,
    pub generator: Arc<Generator>,
    pub load_shedder: Arc<LoadShedder>,
    pub helper_fabric: Arc<HelperFabric>,
    pub run_scheduler: Arc<RunScheduler>,
    pub downloads: Arc<DownloadManager>,
    pub sessions: Arc<SessionStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AppState {{ bind_address: {:?} }}", self.config.bind_address)
    }
}

fn build_backends(config: &Config) -> HashMap<BackendKind, Arc<dyn InferenceBackend>> {
    let timeout = Duration::from_secs(config.backend_request_timeout_secs);
    let mut backends: HashMap<BackendKind, Arc<dyn InferenceBackend>> = HashMap::new();

    let entries: [(BackendKind, &Option<String>); 3] = [
        (BackendKind::VllmMlx, &config.vllm_mlx_backend_url),
        (BackendKind::MlxLm, &config.mlx_lm_backend_url),
        (BackendKind::Gguf, &config.gguf_backend_url),
    ];
    for (kind, base_url) in entries {
        let backend: Arc<dyn InferenceBackend> = match base_url {
            Some(url) => Arc::new(HttpProxyBackend::new(url.clone(), timeout)),
            None => Arc::new(EchoBackend),
        };
        backends.insert(kind, backend);
    }
    backends
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);

        let memory = Arc::new(MemoryMonitor::new(config.memory_threshold_percent)?);
        let registry = Arc::new(CompatibilityRegistry::open(&config.registry_path).await);
        let events = EventBus::new();
        let metrics = Arc::new(MetricsCollector::new());

        let loader: Arc<dyn lmx_core::LoaderProtocol> = Arc::new(ChildLoader::new(
            config.loader_binary_path.clone(),
            Duration::from_secs(config.loader_timeout_secs),
        ));

        let runtime_state_path = if config.runtime_state_path.is_empty() {
            None
        } else {
            Some(std::path::PathBuf::from(&config.runtime_state_path))
        };

        let lifecycle = Arc::new(ModelLifecycle::new(
            Arc::clone(&memory),
            Arc::clone(&registry),
            events.clone(),
            Arc::clone(&metrics),
            loader,
            Duration::from_secs(config.default_keep_alive_secs),
            config.gguf_fallback_enabled,
            runtime_state_path,
        ));

        let admission = Arc::new(AdmissionScheduler::new(
            config.max_concurrent_requests,
            config.per_client_concurrency,
            config.parsed_per_model_concurrency_limits(),
            Duration::from_secs(config.admission_timeout_secs),
            Arc::clone(&metrics),
        ));

        let backends = build_backends(&config);
        let generator = Arc::new(
            Generator::new(
                Arc::clone(&lifecycle),
                Arc::clone(&admission),
                events.clone(),
                Arc::clone(&metrics),
                backends,
                config.auto_load_models,
            )
            .with_call_timeout(Duration::from_secs(config.generation_call_timeout_secs)),
        );

        let load_shedder = Arc::new(LoadShedder::new(Arc::clone(&memory), config.memory_threshold_percent));

        let helper_fabric = Arc::new(HelperFabric::new(
            config.parsed_helper_peers(),
            config.helper_failure_threshold,
            Duration::from_secs(config.helper_reset_timeout_secs),
            Duration::from_secs(config.helper_request_timeout_secs),
            config.helper_max_retries,
        ));

        let run_store: Arc<dyn RunStore> = match config.run_store_backend {
            RunStoreBackend::Memory => Arc::new(InMemoryRunStore::new(config.run_queue_capacity)),
            RunStoreBackend::Sqlite => Arc::new(
                SqliteRunStore::connect(&config.run_store_database_url, config.run_queue_capacity).await?,
            ),
        };
        let run_scheduler = Arc::new(RunScheduler::new(
            run_store,
            Arc::clone(&metrics),
            Duration::from_millis(config.run_scheduler_poll_interval_ms),
            config.run_scheduler_workers,
        ));

        let downloads = Arc::new(DownloadManager::new(Arc::new(HfRepoResolver::new(
            config.download_dest_dir.clone(),
        ))));

        let sessions = Arc::new(SessionStore::new(config.session_state_dir.clone()));

        Ok(Arc::new(Self {
            config,
            memory,
            registry,
            events,
            metrics,
            lifecycle,
            admission,
            generator,
            load_shedder,
            helper_fabric,
            run_scheduler,
            downloads,
            sessions,
        }))
    }
}
