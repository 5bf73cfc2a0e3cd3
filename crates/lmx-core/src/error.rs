//! Errors produced by the orchestration core.
//!
//! Every public operation in `lmx-core` returns `Result<T, RuntimeError>`.
//! `lmx-server` maps each variant onto the OpenAI-style error envelope and an
//! HTTP status code; see that crate's `error.rs`.

use lmx_types::{LoaderFailure, ModelId};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("model not found: {0}")]
    ModelNotFound(ModelId),

    #[error("model already loading: {0}")]
    AlreadyLoading(ModelId),

    #[error("model in use: {0}")]
    ModelInUse(ModelId),

    #[error("insufficient memory to load {model_id} (needs ~{needed_gb:.1}GB)")]
    InsufficientMemory { model_id: ModelId, needed_gb: f64 },

    #[error("probe failed for {model_id}: {reason}")]
    ProbeFailed { model_id: ModelId, reason: String },

    #[error("all backends failed for {model_id}: {cause}")]
    AllBackendsFailed { model_id: ModelId, cause: LoaderFailure },

    #[error("admission timed out after {waited_ms}ms")]
    AdmissionTimeout { waited_ms: u64 },

    #[error("backend busy: {backend_id}")]
    Busy { backend_id: String },

    #[error("run queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("helper transport error: {0}")]
    HelperTransport(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}
