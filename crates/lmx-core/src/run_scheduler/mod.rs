//! C12 — `RunScheduler`: priority-ordered durable queue of agent runs,
//! consumed by a fixed pool of workers.

pub mod sqlite;
mod store;

pub use sqlite::SqliteRunStore;
pub use store::{InMemoryRunStore, RunStore};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lmx_types::{AgentRun, Priority, RunStatus};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::metrics::MetricsCollector;

pub type RunHandler =
    Arc<dyn Fn(AgentRun) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>> + Send + Sync>;

/// Owns a [`RunStore`] and a configurable number of worker loops that claim
/// and execute runs. Crash recovery (requeuing `running` rows) happens once,
/// at [`RunScheduler::start`], before any worker begins polling.
pub struct RunScheduler {
    store: Arc<dyn RunStore>,
    metrics: Arc<MetricsCollector>,
    poll_interval: Duration,
    workers: usize,
}

impl RunScheduler {
    pub fn new(
        store: Arc<dyn RunStore>,
        metrics: Arc<MetricsCollector>,
        poll_interval: Duration,
        workers: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            poll_interval,
            workers: workers.max(1),
        }
    }

    pub async fn submit(
        &self,
        request: serde_json::Value,
        priority_tag: &str,
        idempotency_key: Option<String>,
    ) -> Result<AgentRun, RuntimeError> {
        let priority = Priority::parse_or_normal(priority_tag);
        let run = AgentRun::new(request, priority, idempotency_key);
        self.store.submit(run.clone()).await?;
        Ok(run)
    }

    pub async fn get(&self, run_id: Uuid) -> Option<AgentRun> {
        self.store.get(run_id).await
    }

    pub async fn list(&self) -> Vec<AgentRun> {
        self.store.list().await
    }

    /// Recover crashed-running rows, then spawn `workers` polling loops
    /// driven by `handler`. Returns immediately; loops run for the life of
    /// the process.
    pub fn start(&self, handler: RunHandler) {
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            store.recover_running_to_queued().await;
        });

        for worker_id in 0..self.workers {
            let store = Arc::clone(&self.store);
            let metrics = Arc::clone(&metrics);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                loop {
                    match store.claim_next().await {
                        Some(run) => {
                            info!(worker_id, run_id = %run.id, "agent run claimed");
                            let outcome = handler(run.clone()).await;
                            match outcome {
                                Ok(result) => {
                                    store.mark_completed(run.id, result).await;
                                    metrics.incr_agent_runs_total("completed");
                                }
                                Err(e) => {
                                    error!(run_id = %run.id, error = %e, "agent run failed");
                                    store.mark_failed(run.id, e).await;
                                    metrics.incr_agent_runs_total("failed");
                                }
                            }
                        }
                        None => {
                            tokio::time::sleep(interval).await;
                        }
                    }
                }
            });
        }
    }
}

pub fn run_status_is_terminal(status: RunStatus) -> bool {
    status.is_terminal()
}
