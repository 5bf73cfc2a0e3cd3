//! C3 — `CompatibilityRegistry`: an append-only, file-backed log of
//! (model, backend) load outcomes.

use std::path::{Path, PathBuf};

use chrono::Utc;
use lmx_types::{CompatibilityRecord, ModelId, Outcome};
use tokio::sync::RwLock;
use tracing::warn;

/// Durable record of every load attempt's outcome, used by `BackendPolicy`
/// to decide whether a (model, backend) pair is worth retrying.
///
/// All reads are filter-over-list against an in-memory copy; writes append
/// to that copy and then persist the whole list via write-to-temp-then-
/// rename, so a crash mid-write never corrupts the file. A corrupt file on
/// load is treated as empty (and logged once), rather than failing startup.
#[derive(Debug)]
pub struct CompatibilityRegistry {
    path: PathBuf,
    records: RwLock<Vec<CompatibilityRecord>>,
}

impl CompatibilityRegistry {
    /// Load the registry from `path`, or start empty if the file is absent
    /// or unparsable.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<CompatibilityRecord>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "compatibility registry file is corrupt; starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            records: RwLock::new(records),
        }
    }

    /// Append one record and persist the full log.
    pub async fn record(
        &self,
        model_id: ModelId,
        backend: impl Into<String>,
        backend_version: impl Into<String>,
        outcome: Outcome,
        reason: Option<String>,
    ) {
        let record = CompatibilityRecord {
            model_id,
            backend: backend.into(),
            backend_version: backend_version.into(),
            outcome,
            reason,
            metadata: Default::default(),
            timestamp: Utc::now(),
        };
        let mut records = self.records.write().await;
        records.push(record);
        self.persist(&records).await;
    }

    async fn persist(&self, records: &[CompatibilityRecord]) {
        let Ok(encoded) = serde_json::to_vec_pretty(records) else {
            warn!("failed to encode compatibility registry; skipping persist");
            return;
        };
        let tmp_path = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, &encoded).await {
            warn!(error = %e, "failed to write compatibility registry temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            warn!(error = %e, "failed to rename compatibility registry temp file into place");
        }
    }

    /// All records matching the given filters, in insertion order.
    pub async fn list(
        &self,
        model_id: Option<&str>,
        backend: Option<&str>,
        outcome: Option<Outcome>,
    ) -> Vec<CompatibilityRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| model_id.is_none_or(|m| r.model_id == m))
            .filter(|r| backend.is_none_or(|b| r.backend == b))
            .filter(|r| outcome.is_none_or(|o| r.outcome == o))
            .cloned()
            .collect()
    }

    /// The most recent record for a (model, backend) pair, if any, selected
    /// by the greatest `timestamp`.
    pub async fn latest(&self, model_id: &str, backend: &str) -> Option<CompatibilityRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.model_id == model_id && r.backend == backend)
            .max_by_key(|r| r.timestamp)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_is_selected_by_timestamp_not_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CompatibilityRegistry::open(dir.path().join("registry.json")).await;
        registry
            .record("model-a", "vllm-mlx", "1.0", Outcome::Fail, Some("oom".into()))
            .await;
        registry
            .record("model-a", "vllm-mlx", "1.0", Outcome::Pass, None)
            .await;
        let latest = registry.latest("model-a", "vllm-mlx").await.unwrap();
        assert_eq!(latest.outcome, Outcome::Pass);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let registry = CompatibilityRegistry::open(&path).await;
        assert!(registry.list(None, None, None).await.is_empty());
    }

    #[tokio::test]
    async fn survives_restart_via_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let registry = CompatibilityRegistry::open(&path).await;
            registry
                .record("model-b", "gguf", "b1", Outcome::Pass, None)
                .await;
        }
        let reopened = CompatibilityRegistry::open(&path).await;
        assert_eq!(reopened.list(Some("model-b"), None, None).await.len(), 1);
    }
}
