//! Background model-download bookkeeping, adapted from the lifecycle of the
//! teacher's `slab-libfetch` install pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Failed,
}

/// State of one in-flight or finished repo download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub download_id: Uuid,
    pub repo_id: String,
    pub revision: String,
    pub status: DownloadStatus,
    pub percent: f32,
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub files_completed: u32,
    pub files_total: Option<u32>,
    pub error: Option<String>,
    pub local_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadTask {
    pub fn new(repo_id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            download_id: Uuid::new_v4(),
            repo_id: repo_id.into(),
            revision: revision.into(),
            status: DownloadStatus::Downloading,
            percent: 0.0,
            bytes_downloaded: 0,
            bytes_total: None,
            files_completed: 0,
            files_total: None,
            error: None,
            local_path: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}
