//! C13 — `HelperFabric`: circuit-breaker-gated HTTP clients to peer helper
//! processes, plus a background health-probe loop per peer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::circuit::CircuitBreaker;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HelperResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HelperResponse {
    fn circuit_open() -> Self {
        Self {
            ok: false,
            body: None,
            error: Some("circuit open".to_string()),
        }
    }

    fn transport_error(message: String) -> Self {
        Self {
            ok: false,
            body: None,
            error: Some(message),
        }
    }
}

struct Peer {
    base_url: String,
    breaker: CircuitBreaker,
}

/// One named remote helper: a base URL, an HTTP client, a circuit breaker,
/// and a retry budget.
pub struct HelperFabric {
    client: Client,
    peers: HashMap<String, Peer>,
    max_retries: u32,
    request_timeout: Duration,
}

impl HelperFabric {
    pub fn new(
        peers: HashMap<String, String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        request_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let peers = peers
            .into_iter()
            .map(|(name, base_url)| {
                (
                    name,
                    Peer {
                        base_url,
                        breaker: CircuitBreaker::new(failure_threshold, reset_timeout),
                    },
                )
            })
            .collect();
        Self {
            client,
            peers,
            max_retries,
            request_timeout,
        }
    }

    /// POST `path` with a JSON body to peer `name`. Short-circuits without
    /// any network call if that peer's breaker is open.
    pub async fn call<T: Serialize>(&self, name: &str, path: &str, body: &T) -> HelperResponse {
        let Some(peer) = self.peers.get(name) else {
            return HelperResponse::transport_error(format!("unknown helper peer: {name}"));
        };

        if !peer.breaker.allows_request() {
            return HelperResponse::circuit_open();
        }

        let url = format!("{}{}", peer.base_url.trim_end_matches('/'), path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.post(&url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        peer.breaker.record_success();
                        let body = response.json::<serde_json::Value>().await.ok();
                        return HelperResponse { ok: true, body, error: None };
                    }
                    if attempt > self.max_retries {
                        peer.breaker.record_failure();
                        return HelperResponse::transport_error(format!(
                            "peer {name} responded with status {status}"
                        ));
                    }
                }
                Err(e) => {
                    if attempt > self.max_retries {
                        peer.breaker.record_failure();
                        return HelperResponse::transport_error(format!(
                            "transport error calling peer {name}: {e}"
                        ));
                    }
                    debug!(peer = name, attempt, error = %e, "retrying helper call");
                }
            }
        }
    }

    pub fn circuit_state(&self, name: &str) -> Option<crate::circuit::CircuitState> {
        self.peers.get(name).map(|p| p.breaker.current_state())
    }

    /// Probe every peer's `/healthz` at `interval`; failures are logged
    /// only, never tripping the breaker — only real request failures do
    /// that (see [`CircuitBreaker`]).
    pub fn spawn_health_probes(self: &Arc<Self>, interval: Duration) {
        for name in self.peers.keys().cloned().collect::<Vec<_>>() {
            let fabric = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(peer) = fabric.peers.get(&name) else {
                        return;
                    };
                    let url = format!("{}/healthz", peer.base_url.trim_end_matches('/'));
                    match fabric.client.get(&url).send().await {
                        Ok(response) if response.status().is_success() => {
                            peer.breaker.record_success();
                        }
                        Ok(response) => {
                            warn!(peer = %name, status = %response.status(), "helper health probe returned non-success");
                        }
                        Err(e) => {
                            warn!(peer = %name, error = %e, "helper health probe failed");
                        }
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_peer_yields_transport_error_not_panic() {
        let fabric = HelperFabric::new(
            HashMap::new(),
            3,
            Duration::from_secs(30),
            Duration::from_secs(5),
            1,
        );
        let result = tokio_test_call(&fabric, "nonexistent");
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("unknown helper peer"));
    }

    fn tokio_test_call(fabric: &HelperFabric, name: &str) -> HelperResponse {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fabric.call(name, "/do-thing", &serde_json::json!({})))
    }

    #[test]
    fn open_circuit_short_circuits_without_network_call() {
        let mut peers = HashMap::new();
        peers.insert("peer-a".to_string(), "http://127.0.0.1:1".to_string());
        let fabric = HelperFabric::new(peers, 1, Duration::from_secs(60), Duration::from_millis(10), 0);
        fabric.peers.get("peer-a").unwrap().breaker.record_failure();
        let result = tokio_test_call(&fabric, "peer-a");
        assert!(!result.ok);
        assert_eq!(result.error.unwrap(), "circuit open");
    }
}
