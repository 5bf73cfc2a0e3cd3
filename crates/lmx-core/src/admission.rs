//! C9 — `AdmissionScheduler`: global, per-client, and per-model concurrency
//! gates acquired in order and released in reverse on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

use crate::error::RuntimeError;
use crate::metrics::MetricsCollector;

/// Held for the lifetime of one admitted request. Fields are declared in
/// acquisition order (global, client, model) so that Rust's front-to-back
/// struct field drop order releases them model → client → global — the
/// reverse of acquisition — on every exit path, including cancellation.
pub struct AdmissionPermit {
    _global: OwnedSemaphorePermit,
    _client: OwnedSemaphorePermit,
    _model: Option<OwnedSemaphorePermit>,
}

pub struct AdmissionScheduler {
    global: Arc<Semaphore>,
    per_client_limit: usize,
    per_client: RwLock<HashMap<String, Arc<Semaphore>>>,
    per_model_limits: HashMap<String, usize>,
    per_model: RwLock<HashMap<String, Arc<Semaphore>>>,
    semaphore_timeout: Duration,
    waiting: AtomicI64,
    metrics: Arc<MetricsCollector>,
}

impl AdmissionScheduler {
    pub fn new(
        max_concurrent_requests: usize,
        per_client_default_concurrency: usize,
        per_model_concurrency_limits: HashMap<String, usize>,
        semaphore_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_concurrent_requests)),
            per_client_limit: per_client_default_concurrency,
            per_client: RwLock::new(HashMap::new()),
            per_model_limits: per_model_concurrency_limits,
            per_model: RwLock::new(HashMap::new()),
            semaphore_timeout,
            waiting: AtomicI64::new(0),
            metrics,
        }
    }

    pub fn waiting_queue_count(&self) -> i64 {
        self.waiting.load(Ordering::Relaxed)
    }

    async fn client_semaphore(&self, client_id: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.per_client.read().await.get(client_id) {
            return Arc::clone(sem);
        }
        let mut map = self.per_client.write().await;
        Arc::clone(
            map.entry(client_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_client_limit))),
        )
    }

    async fn model_semaphore(&self, model_id: &str) -> Option<Arc<Semaphore>> {
        let limit = *self.per_model_limits.get(model_id)?;
        if let Some(sem) = self.per_model.read().await.get(model_id) {
            return Some(Arc::clone(sem));
        }
        let mut map = self.per_model.write().await;
        Some(Arc::clone(
            map.entry(model_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(limit))),
        ))
    }

    /// Acquire all applicable gates for `(model_id, client_id)`, in order.
    /// Cancelling this future at any `.await` point releases whatever was
    /// already acquired (each intermediate permit is bound to a local that
    /// is dropped when the future is dropped) and never admits a request
    /// that did not actually acquire every gate.
    pub async fn acquire(
        &self,
        model_id: &str,
        backend: &str,
        client_id: &str,
    ) -> Result<AdmissionPermit, RuntimeError> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = self.acquire_inner(model_id, client_id).await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);

        if result.is_ok() {
            self.metrics
                .observe_queue_wait(model_id, backend, started.elapsed().as_secs_f64());
        }
        result
    }

    async fn acquire_inner(
        &self,
        model_id: &str,
        client_id: &str,
    ) -> Result<AdmissionPermit, RuntimeError> {
        let global = acquire_with_timeout(&self.global, self.semaphore_timeout).await?;

        let client_sem = self.client_semaphore(client_id).await;
        let client = acquire_with_timeout(&client_sem, self.semaphore_timeout).await?;

        let model = match self.model_semaphore(model_id).await {
            Some(sem) => Some(acquire_with_timeout(&sem, self.semaphore_timeout).await?),
            None => None,
        };

        Ok(AdmissionPermit {
            _global: global,
            _client: client,
            _model: model,
        })
    }
}

async fn acquire_with_timeout(
    semaphore: &Arc<Semaphore>,
    timeout: Duration,
) -> Result<OwnedSemaphorePermit, RuntimeError> {
    match tokio::time::timeout(timeout, Arc::clone(semaphore).acquire_owned()).await {
        Ok(Ok(permit)) => Ok(permit),
        Ok(Err(_)) => Err(RuntimeError::Internal("admission semaphore closed".to_string())),
        Err(_) => Err(RuntimeError::AdmissionTimeout {
            waited_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(global: usize, per_client: usize) -> AdmissionScheduler {
        AdmissionScheduler::new(
            global,
            per_client,
            HashMap::new(),
            Duration::from_millis(50),
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn global_limit_blocks_past_capacity() {
        let scheduler = scheduler(1, 10);
        let _first = scheduler.acquire("m", "gguf", "client-a").await.unwrap();
        let err = scheduler.acquire("m", "gguf", "client-b").await.unwrap_err();
        assert!(matches!(err, RuntimeError::AdmissionTimeout { .. }));
    }

    #[tokio::test]
    async fn release_on_drop_frees_the_global_gate() {
        let scheduler = scheduler(1, 10);
        {
            let _permit = scheduler.acquire("m", "gguf", "client-a").await.unwrap();
        }
        assert!(scheduler.acquire("m", "gguf", "client-a").await.is_ok());
    }

    #[tokio::test]
    async fn per_client_limit_is_independent_of_global() {
        let scheduler = scheduler(10, 1);
        let _first = scheduler.acquire("m", "gguf", "client-a").await.unwrap();
        let err = scheduler.acquire("m", "gguf", "client-a").await.unwrap_err();
        assert!(matches!(err, RuntimeError::AdmissionTimeout { .. }));
        assert!(scheduler.acquire("m", "gguf", "client-b").await.is_ok());
    }

    #[tokio::test]
    async fn per_model_limit_applies_only_to_configured_models() {
        let mut limits = HashMap::new();
        limits.insert("model-a".to_string(), 1);
        let scheduler = AdmissionScheduler::new(
            10,
            10,
            limits,
            Duration::from_millis(50),
            Arc::new(MetricsCollector::new()),
        );
        let _first = scheduler.acquire("model-a", "gguf", "client-a").await.unwrap();
        let err = scheduler
            .acquire("model-a", "gguf", "client-b")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::AdmissionTimeout { .. }));
        assert!(scheduler.acquire("model-b", "gguf", "client-c").await.is_ok());
    }

    #[tokio::test]
    async fn cancellation_does_not_leak_partial_acquisition() {
        let scheduler = Arc::new(scheduler(1, 10));
        let _held = scheduler.acquire("m", "gguf", "client-a").await.unwrap();

        let scheduler2 = Arc::clone(&scheduler);
        let waiting = tokio::spawn(async move { scheduler2.acquire("m", "gguf", "client-b").await });
        waiting.abort();
        let _ = waiting.await;

        drop(_held);
        assert!(scheduler.acquire("m", "gguf", "client-c").await.is_ok());
    }
}
