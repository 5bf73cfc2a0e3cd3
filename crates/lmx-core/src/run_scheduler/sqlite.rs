//! SQLite-backed [`RunStore`]: survives restart, FIFO-within-priority
//! preserved via an `enqueued_at` ordering column.

use async_trait::async_trait;
use chrono::Utc;
use lmx_types::{AgentRun, Priority, RunStatus};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use super::store::RunStore;
use crate::error::RuntimeError;

/// `enqueued_at` value used to requeue a crashed `running` row to the head
/// of its priority class: earlier than any real submission.
const HEAD_OF_QUEUE_TIMESTAMP: &str = "0000-01-01T00:00:00Z";

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
    capacity: usize,
}

impl SqliteRunStore {
    pub async fn connect(url: &str, capacity: usize) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_runs (
                run_id TEXT PRIMARY KEY,
                priority TEXT NOT NULL,
                request TEXT NOT NULL,
                status TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                result TEXT,
                error TEXT,
                idempotency_key TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool, capacity })
    }

    fn priority_rank(priority: Priority) -> i32 {
        match priority {
            Priority::Interactive => 0,
            Priority::Normal => 1,
            Priority::Batch => 2,
        }
    }

    fn row_to_run(row: RunRow) -> AgentRun {
        AgentRun {
            id: Uuid::parse_str(&row.run_id).unwrap_or_else(|_| Uuid::nil()),
            request: serde_json::from_str(&row.request).unwrap_or(serde_json::Value::Null),
            status: parse_status(&row.status),
            priority: parse_priority(&row.priority),
            created_at: row.enqueued_at.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: row.updated_at.parse().unwrap_or_else(|_| Utc::now()),
            result: row
                .result
                .and_then(|r| serde_json::from_str(&r).ok()),
            error: row.error,
            idempotency_key: row.idempotency_key,
        }
    }
}

fn parse_status(s: &str) -> RunStatus {
    match s {
        "running" => RunStatus::Running,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        _ => RunStatus::Queued,
    }
}

fn status_tag(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Queued => "queued",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn parse_priority(p: &str) -> Priority {
    Priority::parse_or_normal(p)
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    priority: String,
    request: String,
    status: String,
    enqueued_at: String,
    updated_at: String,
    result: Option<String>,
    error: Option<String>,
    idempotency_key: Option<String>,
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn submit(&self, run: AgentRun) -> Result<(), RuntimeError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agent_runs WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);
        if count as usize >= self.capacity {
            return Err(RuntimeError::QueueFull {
                capacity: self.capacity,
            });
        }

        let request_json = serde_json::to_string(&run.request)
            .map_err(|e| RuntimeError::Internal(format!("failed to encode run request: {e}")))?;
        sqlx::query(
            "INSERT INTO agent_runs
                (run_id, priority, request, status, enqueued_at, updated_at, result, error, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, ?7)",
        )
        .bind(run.id.to_string())
        .bind(run.priority.to_string())
        .bind(request_json)
        .bind(status_tag(run.status))
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.idempotency_key)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::Registry(e.to_string()))?;
        Ok(())
    }

    async fn claim_next(&self) -> Option<AgentRun> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT run_id, priority, request, status, enqueued_at, updated_at, result, error, idempotency_key
             FROM agent_runs WHERE status = 'queued'",
        )
        .fetch_all(&self.pool)
        .await
        .ok()?;

        let candidate = rows.into_iter().min_by_key(|r| {
            (
                Self::priority_rank(parse_priority(&r.priority)),
                r.enqueued_at.clone(),
            )
        })?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE agent_runs SET status = 'running', updated_at = ?1 WHERE run_id = ?2 AND status = 'queued'",
        )
        .bind(&now)
        .bind(&candidate.run_id)
        .execute(&self.pool)
        .await
        .ok()?;

        if result.rows_affected() == 0 {
            // Lost a race with another worker; let the caller poll again.
            return None;
        }

        let mut run = Self::row_to_run(candidate);
        run.status = RunStatus::Running;
        Some(run)
    }

    async fn mark_completed(&self, run_id: Uuid, result: serde_json::Value) {
        let encoded = serde_json::to_string(&result).unwrap_or_default();
        let now = Utc::now().to_rfc3339();
        if let Err(e) = sqlx::query(
            "UPDATE agent_runs SET status = 'completed', result = ?1, updated_at = ?2 WHERE run_id = ?3",
        )
        .bind(encoded)
        .bind(now)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await
        {
            warn!(error = %e, %run_id, "failed to persist run completion");
        }
    }

    async fn mark_failed(&self, run_id: Uuid, error: String) {
        let now = Utc::now().to_rfc3339();
        if let Err(e) = sqlx::query(
            "UPDATE agent_runs SET status = 'failed', error = ?1, updated_at = ?2 WHERE run_id = ?3",
        )
        .bind(error)
        .bind(now)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await
        {
            warn!(error = %e, %run_id, "failed to persist run failure");
        }
    }

    async fn get(&self, run_id: Uuid) -> Option<AgentRun> {
        let row: RunRow = sqlx::query_as(
            "SELECT run_id, priority, request, status, enqueued_at, updated_at, result, error, idempotency_key
             FROM agent_runs WHERE run_id = ?1",
        )
        .bind(run_id.to_string())
        .fetch_one(&self.pool)
        .await
        .ok()?;
        Some(Self::row_to_run(row))
    }

    async fn list(&self) -> Vec<AgentRun> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT run_id, priority, request, status, enqueued_at, updated_at, result, error, idempotency_key
             FROM agent_runs",
        )
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();
        rows.into_iter().map(Self::row_to_run).collect()
    }

    async fn recover_running_to_queued(&self) {
        let now = Utc::now().to_rfc3339();
        if let Err(e) = sqlx::query(
            "UPDATE agent_runs SET status = 'queued', enqueued_at = ?1, updated_at = ?2 WHERE status = 'running'",
        )
        .bind(HEAD_OF_QUEUE_TIMESTAMP)
        .bind(&now)
        .execute(&self.pool)
        .await
        {
            warn!(error = %e, "failed to recover in-flight runs after restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteRunStore {
        SqliteRunStore::connect("sqlite::memory:", 10).await.unwrap()
    }

    #[tokio::test]
    async fn submit_and_claim_round_trip() {
        let store = store().await;
        let run = AgentRun::new(serde_json::json!({"goal": "test"}), Priority::Normal, None);
        store.submit(run.clone()).await.unwrap();
        let claimed = store.claim_next().await.unwrap();
        assert_eq!(claimed.id, run.id);
        assert_eq!(claimed.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn crashed_running_rows_are_requeued_to_head() {
        let store = store().await;
        let older = AgentRun::new(serde_json::json!({}), Priority::Normal, None);
        store.submit(older.clone()).await.unwrap();
        let crashed = store.claim_next().await.unwrap();
        assert_eq!(crashed.id, older.id);

        let newer = AgentRun::new(serde_json::json!({}), Priority::Normal, None);
        store.submit(newer.clone()).await.unwrap();

        store.recover_running_to_queued().await;
        let next = store.claim_next().await.unwrap();
        assert_eq!(next.id, older.id);
    }

    #[tokio::test]
    async fn priority_ordering_across_restart_recovery() {
        let store = store().await;
        let batch = AgentRun::new(serde_json::json!({}), Priority::Batch, None);
        let interactive = AgentRun::new(serde_json::json!({}), Priority::Interactive, None);
        store.submit(batch).await.unwrap();
        store.submit(interactive.clone()).await.unwrap();
        let claimed = store.claim_next().await.unwrap();
        assert_eq!(claimed.id, interactive.id);
    }
}
