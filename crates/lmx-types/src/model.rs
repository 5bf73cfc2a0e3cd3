//! Model identity, loaded-model bookkeeping, and per-model static config.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Opaque model identifier: a HuggingFace repo id or a local filesystem path.
///
/// A `.gguf` suffix or a `gguf` substring (case-insensitive) forces the GGUF
/// backend; see [`crate::registry`] and the backend policy in `lmx-core`.
pub type ModelId = String;

/// A concrete inference engine for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Backend {
    VllmMlx,
    MlxLm,
    Gguf,
}

impl Backend {
    /// Parse a wire-format tag (`"vllm-mlx"`, `"mlx-lm"`, `"gguf"`).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "vllm-mlx" => Some(Backend::VllmMlx),
            "mlx-lm" => Some(Backend::MlxLm),
            "gguf" => Some(Backend::Gguf),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Backend::VllmMlx => "vllm-mlx",
            Backend::MlxLm => "mlx-lm",
            Backend::Gguf => "gguf",
        }
    }
}

/// Speculative-decoding state attached to a [`LoadedModel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeculativeState {
    /// Whether speculative decoding was requested for this model.
    pub requested: bool,
    /// Whether it is actually active (the draft model loaded successfully).
    pub active: bool,
    /// The draft model id, if any.
    pub draft_model: Option<ModelId>,
    /// Human-readable reason speculative decoding is inactive, if requested
    /// but not active.
    pub reason: Option<String>,
}

/// Static, operator-supplied configuration for one model.
///
/// This is the `config` parameter threaded through `BackendPolicy::candidates`
/// in the specification: everything the policy needs to know about a model
/// before any load has been attempted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Free-form architecture string (e.g. `"GLM-MoE-DSA"`), used by the
    /// architecture-signature guard to steer certain models away from
    /// `vllm-mlx`.
    pub architecture: Option<String>,
    /// Backend preference order override; `None` uses the global default.
    pub backend_preference: Option<Vec<String>>,
    /// Known context length, if any.
    pub context_length: Option<u32>,
    /// Arbitrary performance overrides forwarded to the backend (batch size,
    /// thread count, etc.).
    pub performance_overrides: HashMap<String, serde_json::Value>,
    /// Per-model keep-alive override, in seconds. `Some(0)` disables
    /// eviction for this entry; `None` uses the global default.
    pub keep_alive_secs: Option<u64>,
}

/// A model currently resident in the [`crate::model::ModelId`] → engine
/// table owned by `ModelLifecycle`.
///
/// The engine handle itself is opaque to the orchestration core; callers
/// outside `ModelLifecycle` only ever see this record, never the handle.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model_id: ModelId,
    pub backend: Backend,
    /// Monotonic instant the model finished loading.
    pub loaded_at: Instant,
    /// Monotonic instant of the most recent generation against this model.
    pub last_used: Instant,
    /// Total number of generations served by this model since load.
    pub request_count: u64,
    /// Estimated resident memory, in GB, used for admission precheck and LRU
    /// accounting.
    pub estimated_memory_gb: f64,
    /// Context length, if known.
    pub context_length: Option<u32>,
    /// Performance overrides in effect for this load.
    pub performance_overrides: HashMap<String, serde_json::Value>,
    /// Per-model keep-alive override, in seconds; `None` uses the global
    /// default, `Some(0)` disables automatic eviction.
    pub keep_alive_secs: Option<u64>,
    pub speculative: SpeculativeState,
    /// Whether this model was loaded with batching enabled.
    pub batching: bool,
    /// Number of generations currently in flight against this model; a
    /// non-zero count excludes the model from both eviction and unload.
    pub in_flight: u64,
}

impl LoadedModel {
    /// Returns true if this entry has no in-flight generations and is
    /// therefore eligible for unload / eviction.
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }
}
