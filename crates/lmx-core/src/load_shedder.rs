//! C11 — `LoadShedder`: the memory-pressure admission decision consumed by
//! `lmx-server`'s HTTP/WebSocket middleware.
//!
//! This module holds only the decision and message-construction logic; the
//! actual `axum::middleware::from_fn` wiring lives in `lmx-server`, matching
//! the teacher's `middleware::auth::check_management_auth` split between a
//! plain decision function and the axum glue around it.

use std::sync::Arc;

use serde_json::json;

use crate::memory::MemoryMonitor;

/// Paths exempt from load shedding regardless of memory pressure — health
/// checks must keep answering so an operator can see the server is merely
/// overloaded, not dead.
pub const EXEMPT_PATHS: &[&str] = &["/healthz", "/readyz", "/admin/health"];

pub struct LoadShedder {
    memory: Arc<MemoryMonitor>,
    threshold_percent: f64,
}

impl LoadShedder {
    pub fn new(memory: Arc<MemoryMonitor>, threshold_percent: f64) -> Self {
        Self {
            memory,
            threshold_percent,
        }
    }

    pub fn is_exempt(path: &str) -> bool {
        EXEMPT_PATHS.contains(&path)
    }

    /// Returns `Some(current_percent)` if the request should be shed.
    pub fn should_shed(&self, path: &str) -> Option<f64> {
        if Self::is_exempt(path) {
            return None;
        }
        let usage = self.memory.usage_percent();
        if usage >= self.threshold_percent {
            Some(usage)
        } else {
            None
        }
    }

    /// The JSON body for an HTTP 503 rejection, per the specification's
    /// OpenAI-style error envelope.
    pub fn http_rejection_body() -> serde_json::Value {
        json!({
            "error": {
                "message": "Server under memory pressure",
                "type": "server_error",
                "code": "overloaded",
            }
        })
    }

    pub const HTTP_RETRY_AFTER_SECS: u64 = 30;

    /// WebSocket close reason, including the live percent that triggered
    /// the shed, for close code `1013` ("try again later").
    pub fn websocket_close_reason(current_percent: f64) -> String {
        format!("server under memory pressure ({current_percent:.1}% used)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exempt_paths_are_never_shed() {
        let memory = Arc::new(MemoryMonitor::new(50.0).unwrap());
        let shedder = LoadShedder::new(memory, 0.0);
        assert!(shedder.should_shed("/healthz").is_none());
        assert!(shedder.should_shed("/readyz").is_none());
        assert!(shedder.should_shed("/admin/health").is_none());
    }

    #[test]
    fn non_exempt_path_sheds_once_threshold_crossed() {
        let memory = Arc::new(MemoryMonitor::new(50.0).unwrap());
        // Threshold of 0.0 guarantees current usage is >= threshold.
        let shedder = LoadShedder::new(memory, 0.0);
        assert!(shedder.should_shed("/v1/chat/completions").is_some());
    }

    #[test]
    fn unreachable_threshold_never_sheds() {
        let memory = Arc::new(MemoryMonitor::new(99.0).unwrap());
        let shedder = LoadShedder::new(memory, 100.0);
        assert!(shedder.should_shed("/v1/chat/completions").is_none());
    }
}
