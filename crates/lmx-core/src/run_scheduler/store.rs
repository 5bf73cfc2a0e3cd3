use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use lmx_types::{AgentRun, Priority, RunStatus};
use uuid::Uuid;

use crate::error::RuntimeError;

/// Persistence + queueing backend for the run scheduler. Implementations
/// must preserve FIFO-within-priority ordering and make `claim_next`
/// atomic: two concurrent callers never claim the same run.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn submit(&self, run: AgentRun) -> Result<(), RuntimeError>;
    async fn claim_next(&self) -> Option<AgentRun>;
    async fn mark_completed(&self, run_id: Uuid, result: serde_json::Value);
    async fn mark_failed(&self, run_id: Uuid, error: String);
    async fn get(&self, run_id: Uuid) -> Option<AgentRun>;
    async fn list(&self) -> Vec<AgentRun>;
    /// Rows left `running` from a crashed worker are moved back to the head
    /// of their priority class. Called once at startup for durable stores;
    /// a no-op for the in-memory store, which never survives a crash.
    async fn recover_running_to_queued(&self) {}
}

#[derive(Eq, PartialEq)]
struct QueueKey {
    priority: Priority,
    sequence: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: higher priority first, then lower
        // (earlier) sequence number first within the same priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    runs: HashMap<Uuid, AgentRun>,
    queue: BinaryHeap<(QueueKey, Uuid)>,
    next_sequence: u64,
    history: VecDeque<Uuid>,
}

/// Bounded in-process queue. Overflow raises [`RuntimeError::QueueFull`];
/// state is lost on restart (no persistence), matching the "in-memory"
/// backend described for [`crate::run_scheduler::RunScheduler`].
pub struct InMemoryRunStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl InMemoryRunStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                runs: HashMap::new(),
                queue: BinaryHeap::new(),
                next_sequence: 0,
                history: VecDeque::new(),
            }),
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn submit(&self, run: AgentRun) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().expect("run store mutex poisoned");
        if inner.queue.len() >= self.capacity {
            return Err(RuntimeError::QueueFull {
                capacity: self.capacity,
            });
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let key = QueueKey {
            priority: run.priority,
            sequence,
        };
        inner.queue.push((key, run.id));
        inner.history.push_back(run.id);
        if inner.history.len() > self.capacity * 4 {
            if let Some(old) = inner.history.pop_front() {
                inner.runs.remove(&old);
            }
        }
        inner.runs.insert(run.id, run);
        Ok(())
    }

    async fn claim_next(&self) -> Option<AgentRun> {
        let mut inner = self.inner.lock().expect("run store mutex poisoned");
        loop {
            let (_, run_id) = inner.queue.pop()?;
            if let Some(run) = inner.runs.get_mut(&run_id) {
                if run.transition(RunStatus::Running) {
                    return Some(run.clone());
                }
            }
        }
    }

    async fn mark_completed(&self, run_id: Uuid, result: serde_json::Value) {
        let mut inner = self.inner.lock().expect("run store mutex poisoned");
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.result = Some(result);
            run.transition(RunStatus::Completed);
        }
    }

    async fn mark_failed(&self, run_id: Uuid, error: String) {
        let mut inner = self.inner.lock().expect("run store mutex poisoned");
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.error = Some(error);
            run.transition(RunStatus::Failed);
        }
    }

    async fn get(&self, run_id: Uuid) -> Option<AgentRun> {
        self.inner
            .lock()
            .expect("run store mutex poisoned")
            .runs
            .get(&run_id)
            .cloned()
    }

    async fn list(&self) -> Vec<AgentRun> {
        self.inner
            .lock()
            .expect("run store mutex poisoned")
            .runs
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_within_priority_and_priority_order_across_classes() {
        let store = InMemoryRunStore::new(10);
        let batch = AgentRun::new(serde_json::json!({}), Priority::Batch, None);
        let interactive = AgentRun::new(serde_json::json!({}), Priority::Interactive, None);
        let normal_first = AgentRun::new(serde_json::json!({}), Priority::Normal, None);
        let normal_second = AgentRun::new(serde_json::json!({}), Priority::Normal, None);

        store.submit(batch.clone()).await.unwrap();
        store.submit(normal_first.clone()).await.unwrap();
        store.submit(interactive.clone()).await.unwrap();
        store.submit(normal_second.clone()).await.unwrap();

        assert_eq!(store.claim_next().await.unwrap().id, interactive.id);
        assert_eq!(store.claim_next().await.unwrap().id, normal_first.id);
        assert_eq!(store.claim_next().await.unwrap().id, normal_second.id);
        assert_eq!(store.claim_next().await.unwrap().id, batch.id);
    }

    #[tokio::test]
    async fn overflow_raises_queue_full() {
        let store = InMemoryRunStore::new(1);
        store
            .submit(AgentRun::new(serde_json::json!({}), Priority::Normal, None))
            .await
            .unwrap();
        let err = store
            .submit(AgentRun::new(serde_json::json!({}), Priority::Normal, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::QueueFull { capacity: 1 }));
    }
}
