//! Server configuration, loaded from environment variables at startup.

/// Which [`lmx_core::run_scheduler::RunStore`] backend to construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStoreBackend {
    Memory,
    Sqlite,
}

/// Runtime configuration for `lmx-server`.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When `true`, serve the Swagger UI at `/swagger-ui` and the OpenAPI
    /// spec at `/api-docs/openapi.json`.
    pub enable_swagger: bool,

    /// Comma-separated list of allowed CORS origins. `None` allows all.
    pub cors_allowed_origins: Option<String>,

    /// Required `X-Admin-Key` value for `/admin/*`. `None` disables the check.
    pub admin_api_key: Option<String>,

    /// Required `Authorization: Bearer`/`X-Api-Key` value for inference
    /// endpoints. `None` disables the check.
    pub inference_api_key: Option<String>,

    /// Memory-pressure threshold percent, in `[50, 99]`, above which
    /// non-exempt requests are shed with 503.
    pub memory_threshold_percent: f64,

    /// Global maximum concurrent admitted requests.
    pub max_concurrent_requests: usize,

    /// Default per-client concurrency limit.
    pub per_client_concurrency: usize,

    /// Per-model concurrency overrides, `model_id=limit` pairs separated by
    /// commas, e.g. `"big-model=1,small-model=8"`.
    pub per_model_concurrency_limits: String,

    /// How long a request waits for an admission semaphore before failing
    /// with `admission_timeout`.
    pub admission_timeout_secs: u64,

    /// Default keep-alive TTL for an idle loaded model before it becomes
    /// eviction-eligible.
    pub default_keep_alive_secs: u64,

    /// Whether backend selection falls back to `gguf` when the preferred
    /// backends are unavailable.
    pub gguf_fallback_enabled: bool,

    /// Path to the runtime state file (`{last_clean_shutdown, loaded_models}`).
    pub runtime_state_path: String,

    /// Path to the compatibility registry file.
    pub registry_path: String,

    /// Directory where session-bridge JSON files are stored.
    pub session_state_dir: String,

    /// Path to the isolated loader worker binary.
    pub loader_binary_path: String,

    /// Timeout for one child-loader load attempt.
    pub loader_timeout_secs: u64,

    /// Run-scheduler backend: `"memory"` or `"sqlite"`.
    pub run_store_backend: RunStoreBackend,

    /// SQLite database URL, used only when `run_store_backend` is `sqlite`.
    pub run_store_database_url: String,

    /// Bounded capacity of the in-memory run store.
    pub run_queue_capacity: usize,

    /// Number of run-scheduler worker loops.
    pub run_scheduler_workers: usize,

    /// Poll interval for an idle run-scheduler worker.
    pub run_scheduler_poll_interval_ms: u64,

    /// Comma-separated `name=base_url` pairs of helper fabric peers.
    pub helper_peers: String,

    /// Consecutive-failure count before a helper peer's circuit opens.
    pub helper_failure_threshold: u32,

    /// How long an open helper circuit stays open before allowing a probe.
    pub helper_reset_timeout_secs: u64,

    /// Per-call timeout for a helper HTTP request.
    pub helper_request_timeout_secs: u64,

    /// Retry budget for a helper HTTP request.
    pub helper_max_retries: u32,

    /// Probe interval for the helper fabric's background health checks.
    pub helper_health_probe_interval_secs: u64,

    /// Destination directory for completed `DownloadManager` fetches.
    pub download_dest_dir: String,

    /// Directory to download-task TTL reaping sweep interval, in seconds.
    pub download_reap_interval_secs: u64,

    /// Base URL of a locally running `vllm-mlx`-compatible server. `None`
    /// falls back to an in-process echo backend for that backend kind.
    pub vllm_mlx_backend_url: Option<String>,

    /// Base URL of a locally running `mlx-lm`-compatible server.
    pub mlx_lm_backend_url: Option<String>,

    /// Base URL of a locally running `gguf` (e.g. llama.cpp server)
    /// OpenAI-compatible endpoint.
    pub gguf_backend_url: Option<String>,

    /// Per-call HTTP timeout applied to any configured backend proxy.
    pub backend_request_timeout_secs: u64,

    /// Whether `Generator` should auto-load a model on first request to an
    /// unloaded model id.
    pub auto_load_models: bool,

    /// Per-call timeout applied by `Generator` around `generate`/`stream`.
    pub generation_call_timeout_secs: u64,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("LMX_BIND", "0.0.0.0:8080"),
            log_level: env_or("LMX_LOG", "info"),
            log_json: std::env::var("LMX_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            enable_swagger: std::env::var("LMX_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            cors_allowed_origins: std::env::var("LMX_CORS_ORIGINS").ok(),
            admin_api_key: std::env::var("LMX_ADMIN_KEY").ok(),
            inference_api_key: std::env::var("LMX_INFERENCE_API_KEY").ok(),
            memory_threshold_percent: parse_env("LMX_MEMORY_THRESHOLD_PERCENT", 90.0),
            max_concurrent_requests: parse_env("LMX_MAX_CONCURRENT_REQUESTS", 16),
            per_client_concurrency: parse_env("LMX_PER_CLIENT_CONCURRENCY", 4),
            per_model_concurrency_limits: env_or("LMX_PER_MODEL_CONCURRENCY_LIMITS", ""),
            admission_timeout_secs: parse_env("LMX_ADMISSION_TIMEOUT_SECS", 30),
            default_keep_alive_secs: parse_env("LMX_DEFAULT_KEEP_ALIVE_SECS", 300),
            gguf_fallback_enabled: std::env::var("LMX_GGUF_FALLBACK_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            runtime_state_path: env_or("LMX_RUNTIME_STATE_PATH", "/tmp/lmx/runtime_state.json"),
            registry_path: env_or("LMX_REGISTRY_PATH", "/tmp/lmx/compat_registry.json"),
            session_state_dir: env_or("LMX_SESSION_STATE_DIR", "/tmp/lmx/sessions"),
            loader_binary_path: env_or("LMX_LOADER_BINARY_PATH", "lmx-loader"),
            loader_timeout_secs: parse_env("LMX_LOADER_TIMEOUT_SECS", 120),
            run_store_backend: match env_or("LMX_RUN_STORE_BACKEND", "memory").as_str() {
                "sqlite" => RunStoreBackend::Sqlite,
                _ => RunStoreBackend::Memory,
            },
            run_store_database_url: env_or("LMX_RUN_STORE_DATABASE_URL", "sqlite://lmx_runs.db?mode=rwc"),
            run_queue_capacity: parse_env("LMX_RUN_QUEUE_CAPACITY", 256),
            run_scheduler_workers: parse_env("LMX_RUN_SCHEDULER_WORKERS", 2),
            run_scheduler_poll_interval_ms: parse_env("LMX_RUN_SCHEDULER_POLL_INTERVAL_MS", 250),
            helper_peers: env_or("LMX_HELPER_PEERS", ""),
            helper_failure_threshold: parse_env("LMX_HELPER_FAILURE_THRESHOLD", 3),
            helper_reset_timeout_secs: parse_env("LMX_HELPER_RESET_TIMEOUT_SECS", 30),
            helper_request_timeout_secs: parse_env("LMX_HELPER_REQUEST_TIMEOUT_SECS", 10),
            helper_max_retries: parse_env("LMX_HELPER_MAX_RETRIES", 2),
            helper_health_probe_interval_secs: parse_env("LMX_HELPER_HEALTH_PROBE_INTERVAL_SECS", 15),
            download_dest_dir: env_or("LMX_DOWNLOAD_DEST_DIR", "/tmp/lmx/downloads"),
            download_reap_interval_secs: parse_env("LMX_DOWNLOAD_REAP_INTERVAL_SECS", 3600),
            vllm_mlx_backend_url: std::env::var("LMX_VLLM_MLX_URL").ok(),
            mlx_lm_backend_url: std::env::var("LMX_MLX_LM_URL").ok(),
            gguf_backend_url: std::env::var("LMX_GGUF_URL").ok(),
            backend_request_timeout_secs: parse_env("LMX_BACKEND_REQUEST_TIMEOUT_SECS", 120),
            auto_load_models: std::env::var("LMX_AUTO_LOAD_MODELS")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            generation_call_timeout_secs: parse_env("LMX_GENERATION_CALL_TIMEOUT_SECS", 120),
        }
    }

    /// Parse [`Self::per_model_concurrency_limits`] into a lookup map.
    pub fn parsed_per_model_concurrency_limits(&self) -> std::collections::HashMap<String, usize> {
        let mut map = std::collections::HashMap::new();
        for entry in self.per_model_concurrency_limits.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some((model_id, limit)) = entry.split_once('=') {
                if let Ok(limit) = limit.trim().parse::<usize>() {
                    map.insert(model_id.trim().to_string(), limit);
                }
            }
        }
        map
    }

    /// Parse [`Self::helper_peers`] into a lookup map of name to base URL.
    pub fn parsed_helper_peers(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        for entry in self.helper_peers.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some((name, url)) = entry.split_once('=') {
                map.insert(name.trim().to_string(), url.trim().to_string());
            }
        }
        map
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_model_limits_parse_skips_malformed_entries() {
        let mut cfg = Config::from_env();
        cfg.per_model_concurrency_limits = "big-model=1, small-model=8,garbage,=5,x=".to_string();
        let parsed = cfg.parsed_per_model_concurrency_limits();
        assert_eq!(parsed.get("big-model"), Some(&1));
        assert_eq!(parsed.get("small-model"), Some(&8));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn helper_peers_parse_name_url_pairs() {
        let mut cfg = Config::from_env();
        cfg.helper_peers = "peer-a=http://127.0.0.1:9001,peer-b=http://127.0.0.1:9002".to_string();
        let parsed = cfg.parsed_helper_peers();
        assert_eq!(parsed.get("peer-a").map(String::as_str), Some("http://127.0.0.1:9001"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn empty_per_model_limits_yields_empty_map() {
        let cfg = Config::from_env();
        assert!(cfg.parsed_per_model_concurrency_limits().is_empty());
    }
}
