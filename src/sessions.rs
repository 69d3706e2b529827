//! Session registry: which user uploaded which PDF.
//!
//! Backed by one JSON file mapping session id to `{user_id, filename}`:
//!
//! ```json
//! { "3f0c…": { "user_id": "u-1", "filename": "report.pdf" } }
//! ```
//!
//! The whole map is rewritten on every [`SessionRegistry::create`]. The
//! rewrite happens after the map lock is released, so two concurrent
//! creates can land on disk in the wrong order and the file may lose the
//! later record until the next create.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    user_id: String,
    filename: String,
}

pub struct SessionRegistry {
    path: PathBuf,
    sessions: RwLock<BTreeMap<String, SessionRecord>>,
}

impl SessionRegistry {
    /// Load the registry from `path`. A missing file yields an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sessions = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Malformed session file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read session file: {}", path.display()))
            }
        };

        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a session and persist the full registry.
    pub async fn create(&self, session_id: &str, user_id: &str, filename: &str) -> Result<()> {
        let snapshot = {
            let mut sessions = self.write_lock();
            sessions.insert(
                session_id.to_string(),
                SessionRecord {
                    user_id: user_id.to_string(),
                    filename: filename.to_string(),
                },
            );
            serde_json::to_string_pretty(&*sessions).context("Failed to serialize sessions")?
        };

        tokio::fs::write(&self.path, snapshot)
            .await
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        tracing::info!(session_id, user_id, "session created");
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.read_lock()
            .get(session_id)
            .map(|record| to_session(session_id, record))
    }

    /// True iff the session exists and belongs to `user_id`.
    pub fn verify_ownership(&self, session_id: &str, user_id: &str) -> bool {
        self.get(session_id)
            .map(|s| s.user_id == user_id)
            .unwrap_or(false)
    }

    /// Sessions owned by `user_id`, ordered by session id.
    pub fn list_for_user(&self, user_id: &str) -> Vec<Session> {
        self.list()
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect()
    }

    /// Every session, ordered by session id.
    pub fn list(&self) -> Vec<Session> {
        self.read_lock()
            .iter()
            .map(|(id, record)| to_session(id, record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Inserts are a single map operation, so a map poisoned by a panicking
    // holder is still consistent and stays in use.
    fn read_lock(&self) -> RwLockReadGuard<'_, BTreeMap<String, SessionRecord>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            tracing::error!(path = %self.path.display(), "session registry lock poisoned");
            poisoned.into_inner()
        })
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SessionRecord>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::error!(path = %self.path.display(), "session registry lock poisoned");
            poisoned.into_inner()
        })
    }
}

fn to_session(session_id: &str, record: &SessionRecord) -> Session {
    Session {
        session_id: session_id.to_string(),
        user_id: record.user_id.clone(),
        filename: record.filename.clone(),
    }
}
