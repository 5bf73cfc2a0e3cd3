//! Session bridge: a thin file-backed JSON store behind `/v1/sessions*`.
//!
//! Out-of-scope for the orchestration core, implemented only far enough to
//! make the HTTP surface functional end-to-end. One JSON file per session
//! under `session_state_dir`, written temp-then-rename the same way
//! `lmx_core::registry::CompatibilityRegistry` persists its log.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lmx_types::ChatMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub metadata: serde_json::Value,
}

impl Session {
    fn new(metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            metadata,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(Uuid),
    #[error("session store io error: {0}")]
    Io(String),
}

/// Serializes writes with a single mutex, mirroring the registry's
/// single-writer note — reads go straight to disk since they are rare
/// relative to the admin SSE/generation hot paths this process spends most
/// of its time on.
pub struct SessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;
        let encoded = serde_json::to_vec_pretty(session)
            .map_err(|e| SessionError::Io(format!("failed to encode session: {e}")))?;
        let path = self.path_for(session.id);
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &encoded)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;
        Ok(())
    }

    pub async fn create(&self, metadata: serde_json::Value) -> Result<Session, SessionError> {
        let _guard = self.write_lock.lock().await;
        let session = Session::new(metadata);
        self.write(&session).await?;
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, SessionError> {
        let bytes = tokio::fs::read(self.path_for(id))
            .await
            .map_err(|_| SessionError::NotFound(id))?;
        serde_json::from_slice(&bytes).map_err(|e| SessionError::Io(format!("corrupt session file: {e}")))
    }

    pub async fn append_message(&self, id: Uuid, message: ChatMessage) -> Result<Session, SessionError> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.get(id).await?;
        session.messages.push(message);
        session.updated_at = Utc::now();
        self.write(&session).await?;
        Ok(session)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::remove_file(self.path_for(id))
            .await
            .map_err(|_| SessionError::NotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Session>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut sessions = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| SessionError::Io(e.to_string()))?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt session file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read session file"),
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    /// Sessions with at least one message whose content contains `needle`
    /// (case-insensitive).
    pub async fn search(&self, needle: &str) -> Result<Vec<Session>, SessionError> {
        let needle = needle.to_lowercase();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| {
                s.messages
                    .iter()
                    .any(|m| m.content.to_lowercase().contains(&needle))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmx_types::ChatRole;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store.create(serde_json::json!({"tag": "t"})).await.unwrap();
        let fetched = store.get(session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.metadata, serde_json::json!({"tag": "t"}));
    }

    #[tokio::test]
    async fn append_message_persists_and_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store.create(serde_json::Value::Null).await.unwrap();
        let updated = store
            .append_message(
                session.id,
                ChatMessage {
                    role: ChatRole::User,
                    content: "hello world".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.messages.len(), 1);
        assert!(updated.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store.create(serde_json::Value::Null).await.unwrap();
        store.delete(session.id).await.unwrap();
        assert!(matches!(store.get(session.id).await, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn search_matches_message_content_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = store.create(serde_json::Value::Null).await.unwrap();
        store
            .append_message(
                session.id,
                ChatMessage {
                    role: ChatRole::User,
                    content: "Find the Needle".to_string(),
                },
            )
            .await
            .unwrap();
        let results = store.search("needle").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, session.id);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
