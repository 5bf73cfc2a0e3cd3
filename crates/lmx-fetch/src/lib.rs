//! Model repository download pipeline.
//!
//! Adapted from the teacher's `slab-libfetch` release-asset fetcher: the
//! same `reqwest`-based client and retry idiom, repointed from GitHub
//! release assets at a generic HTTP source (a HuggingFace-style repo file
//! listing in production, any URL in tests) and tracking progress in a
//! shared [`DownloadTask`] row instead of printing to stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lmx_types::{DownloadStatus, DownloadTask};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a terminal (`completed`/`failed`) task is kept before the reaper
/// sweep removes it.
const DEFAULT_TASK_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download not found: {0}")]
    NotFound(Uuid),
}

/// Resolves a `(repo_id, revision)` pair to a concrete download URL and a
/// destination path. Kept as a trait so tests can avoid real network I/O;
/// production wiring (in `lmx-server`) supplies a HuggingFace-flavored
/// resolver.
pub trait RepoResolver: Send + Sync {
    fn resolve_url(&self, repo_id: &str, revision: &str) -> String;
    fn resolve_dest(&self, repo_id: &str, revision: &str) -> PathBuf;
}

struct Inner {
    tasks: HashMap<Uuid, DownloadTask>,
}

/// Tracks in-flight and recently-finished repo downloads.
///
/// `start` spawns a background task that streams the HTTP response body,
/// updating `bytes_downloaded`/`percent` on the shared row as chunks
/// arrive, and transitions the row to `completed` or `failed` on finish.
pub struct DownloadManager {
    client: reqwest::Client,
    resolver: Arc<dyn RepoResolver>,
    inner: Arc<RwLock<Inner>>,
    task_ttl: Duration,
}

impl DownloadManager {
    pub fn new(resolver: Arc<dyn RepoResolver>) -> Self {
        Self::with_ttl(resolver, DEFAULT_TASK_TTL)
    }

    pub fn with_ttl(resolver: Arc<dyn RepoResolver>, task_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver,
            inner: Arc::new(RwLock::new(Inner {
                tasks: HashMap::new(),
            })),
            task_ttl,
        }
    }

    pub async fn start(&self, repo_id: impl Into<String>, revision: impl Into<String>) -> Uuid {
        let repo_id = repo_id.into();
        let revision = revision.into();
        let task = DownloadTask::new(repo_id.clone(), revision.clone());
        let download_id = task.download_id;

        self.inner.write().await.tasks.insert(download_id, task);

        let client = self.client.clone();
        let url = self.resolver.resolve_url(&repo_id, &revision);
        let dest = self.resolver.resolve_dest(&repo_id, &revision);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            if let Err(e) = run_download(&client, &url, &dest, download_id, &inner).await {
                warn!(%download_id, error = %e, "download failed");
                let mut guard = inner.write().await;
                if let Some(task) = guard.tasks.get_mut(&download_id) {
                    task.status = DownloadStatus::Failed;
                    task.error = Some(e);
                    task.completed_at = Some(chrono::Utc::now());
                }
            }
        });

        download_id
    }

    pub async fn status(&self, download_id: Uuid) -> Result<DownloadTask, DownloadError> {
        self.inner
            .read()
            .await
            .tasks
            .get(&download_id)
            .cloned()
            .ok_or(DownloadError::NotFound(download_id))
    }

    pub async fn list(&self) -> Vec<DownloadTask> {
        self.inner.read().await.tasks.values().cloned().collect()
    }

    /// Remove terminal tasks older than the configured TTL. Intended to be
    /// called periodically by a background sweep in `lmx-server`.
    pub async fn reap_expired(&self) {
        let now = chrono::Utc::now();
        let ttl = chrono::Duration::from_std(self.task_ttl).unwrap_or(chrono::Duration::zero());
        let mut guard = self.inner.write().await;
        guard.tasks.retain(|_, task| {
            if !task.is_terminal() {
                return true;
            }
            match task.completed_at {
                Some(completed_at) => now - completed_at < ttl,
                None => true,
            }
        });
    }
}

async fn run_download(
    client: &reqwest::Client,
    url: &str,
    dest: &std::path::Path,
    download_id: Uuid,
    inner: &Arc<RwLock<Inner>>,
) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?
        .error_for_status()
        .map_err(|e| format!("non-success status: {e}"))?;

    let total = response.content_length();
    {
        let mut guard = inner.write().await;
        if let Some(task) = guard.tasks.get_mut(&download_id) {
            task.bytes_total = total;
        }
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create destination directory: {e}"))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("failed to create destination file: {e}"))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("stream read failed: {e}"))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        downloaded += chunk.len() as u64;

        let mut guard = inner.write().await;
        if let Some(task) = guard.tasks.get_mut(&download_id) {
            task.bytes_downloaded = downloaded;
            task.percent = total
                .map(|t| (downloaded as f32 / t as f32) * 100.0)
                .unwrap_or(0.0);
        }
    }

    let mut guard = inner.write().await;
    if let Some(task) = guard.tasks.get_mut(&download_id) {
        task.status = DownloadStatus::Completed;
        task.percent = 100.0;
        task.files_completed = 1;
        task.files_total = Some(1);
        task.local_path = Some(dest.display().to_string());
        task.completed_at = Some(chrono::Utc::now());
    }
    info!(%download_id, "download completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticResolver {
        url: String,
        dest: PathBuf,
    }

    impl RepoResolver for StaticResolver {
        fn resolve_url(&self, _repo_id: &str, _revision: &str) -> String {
            self.url.clone()
        }

        fn resolve_dest(&self, _repo_id: &str, _revision: &str) -> PathBuf {
            self.dest.clone()
        }
    }

    #[tokio::test]
    async fn unknown_download_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(StaticResolver {
            url: "http://127.0.0.1:1/nope".to_string(),
            dest: dir.path().join("out.bin"),
        });
        let manager = DownloadManager::new(resolver);
        let err = manager.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_registers_a_downloading_task_immediately() {
        let dir = tempfile::tempdir().unwrap();
        // Port 1 is reserved and will refuse the connection quickly, so the
        // background task fails fast without needing a live server.
        let resolver = Arc::new(StaticResolver {
            url: "http://127.0.0.1:1/nope".to_string(),
            dest: dir.path().join("out.bin"),
        });
        let manager = DownloadManager::new(resolver);
        let id = manager.start("org/model", "main").await;
        let task = manager.status(id).await.unwrap();
        assert_eq!(task.repo_id, "org/model");
    }

    #[tokio::test]
    async fn reap_expired_keeps_fresh_terminal_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(StaticResolver {
            url: "http://127.0.0.1:1/nope".to_string(),
            dest: dir.path().join("out.bin"),
        });
        let manager = DownloadManager::with_ttl(resolver, Duration::from_secs(3600));
        let id = manager.start("org/model", "main").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.reap_expired().await;
        assert!(manager.status(id).await.is_ok());
    }
}
