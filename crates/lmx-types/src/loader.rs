//! IPC payloads exchanged with the isolated child loader process.
//!
//! These three types are the entire wire contract between `lmx-core`'s
//! `ChildLoader` and the `lmx-loader` worker binary: one [`LoadSpec`] goes
//! out, one [`LoadResult`] or [`LoaderFailure`] comes back. Keep the schema
//! stable — signal and exit-code plumbing are part of the contract, not an
//! implementation detail.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// Request sent to the child loader on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSpec {
    pub model_id: ModelId,
    pub backend: String,
    pub batching: bool,
    #[serde(default)]
    pub performance_overrides: HashMap<String, serde_json::Value>,
    /// When `true`, the worker probes compatibility only — no canary
    /// inference is run and no engine handle needs to be kept alive.
    #[serde(default)]
    pub probe_only: bool,
}

/// Successful outcome returned by the child loader on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResult {
    pub ok: bool,
    pub backend: String,
    pub reason: Option<String>,
    #[serde(default)]
    pub telemetry: HashMap<String, serde_json::Value>,
}

/// Failure outcome, either returned explicitly by the worker (as a
/// `LoaderWorkerError`) or synthesized by the parent from the worker's exit
/// status when it never produced a structured reply at all.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("loader failure [{code}]: {message}")]
pub struct LoaderFailure {
    pub code: String,
    pub message: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LoaderFailure {
    /// Construct the failure record for a worker that crashed (non-zero
    /// exit or killed by signal) without emitting a `LoadResult`.
    pub fn crashed(exit_code: Option<i32>, signal: Option<i32>, stderr_tail: String) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("stderr".to_string(), serde_json::Value::String(stderr_tail));
        Self {
            code: "model_loader_crashed".to_string(),
            message: "loader worker exited without a structured result".to_string(),
            exit_code,
            signal,
            metadata,
        }
    }

    /// Construct the failure record for a worker that ran past its deadline.
    pub fn timeout() -> Self {
        Self {
            code: "loader_timeout".to_string(),
            message: "loader worker exceeded its time budget and was killed".to_string(),
            exit_code: None,
            signal: None,
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_spec_round_trips_through_json() {
        let spec = LoadSpec {
            model_id: "org/model".to_string(),
            backend: "gguf".to_string(),
            batching: true,
            performance_overrides: HashMap::from([(
                "threads".to_string(),
                serde_json::json!(8),
            )]),
            probe_only: false,
        };
        let encoded = serde_json::to_string(&spec).unwrap();
        let decoded: LoadSpec = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.model_id, spec.model_id);
        assert_eq!(decoded.backend, spec.backend);
        assert_eq!(decoded.batching, spec.batching);
        assert_eq!(decoded.performance_overrides, spec.performance_overrides);
    }

    #[test]
    fn load_result_round_trips_through_json() {
        let result = LoadResult {
            ok: true,
            backend: "mlx-lm".to_string(),
            reason: None,
            telemetry: HashMap::from([("load_ms".to_string(), serde_json::json!(1234))]),
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: LoadResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.ok, result.ok);
        assert_eq!(decoded.backend, result.backend);
        assert_eq!(decoded.telemetry, result.telemetry);
    }

    #[test]
    fn loader_failure_round_trips_through_json() {
        let failure = LoaderFailure::crashed(None, Some(11), "segfault near tensor.rs".into());
        let encoded = serde_json::to_string(&failure).unwrap();
        let decoded: LoaderFailure = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.code, failure.code);
        assert_eq!(decoded.signal, Some(11));
        assert_eq!(
            decoded.metadata.get("stderr").and_then(|v| v.as_str()),
            Some("segfault near tensor.rs")
        );
    }
}
