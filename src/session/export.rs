//! Writing finished sessions to storage.

use crate::error::{LeadlineError, Result};
use crate::session::model::CallSession;
use crate::session::store::SessionExport;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where the artifacts of one call ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCall {
    pub analytics: PathBuf,
    pub minutes: PathBuf,
}

/// Stores a finished session and its minutes of meeting.
#[async_trait]
pub trait SessionPersister: Send + Sync {
    async fn persist(&self, export: &SessionExport, minutes: &str) -> Result<PersistedCall>;
}

/// Writes `<dir>/<call_id>_analytics.json` and `<dir>/<call_id>.txt`.
#[derive(Debug, Clone)]
pub struct FileSessionPersister {
    dir: PathBuf,
}

impl FileSessionPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn analytics_path(&self, call_id: &str) -> PathBuf {
        self.dir.join(format!("{}_analytics.json", call_id))
    }

    pub fn minutes_path(&self, call_id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", call_id))
    }
}

fn persistence_error(path: &Path, e: impl std::fmt::Display) -> LeadlineError {
    LeadlineError::Persistence {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl SessionPersister for FileSessionPersister {
    async fn persist(&self, export: &SessionExport, minutes: &str) -> Result<PersistedCall> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence_error(&self.dir, e))?;

        let session = &export.session;
        let json = serde_json::to_string_pretty(export)?;

        let analytics = self.analytics_path(&session.call_id);
        tokio::fs::write(&analytics, json)
            .await
            .map_err(|e| persistence_error(&analytics, e))?;

        let minutes_path = self.minutes_path(&session.call_id);
        tokio::fs::write(&minutes_path, minutes)
            .await
            .map_err(|e| persistence_error(&minutes_path, e))?;

        tracing::info!(
            analytics = %analytics.display(),
            minutes = %minutes_path.display(),
            "Session persisted"
        );

        Ok(PersistedCall {
            analytics,
            minutes: minutes_path,
        })
    }
}

/// Mock persister for testing; keeps every persisted session in memory.
#[derive(Debug, Default)]
pub struct MockPersister {
    saved: Mutex<Vec<(CallSession, String)>>,
    should_fail: bool,
}

impl MockPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on persist
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn saved(&self) -> Vec<(CallSession, String)> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.saved.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionPersister for MockPersister {
    async fn persist(&self, export: &SessionExport, minutes: &str) -> Result<PersistedCall> {
        let session = &export.session;
        if self.should_fail {
            return Err(LeadlineError::Persistence {
                path: "memory".to_string(),
                message: "mock persistence failure".to_string(),
            });
        }
        if let Ok(mut saved) = self.saved.lock() {
            saved.push((session.clone(), minutes.to_string()));
        }
        Ok(PersistedCall {
            analytics: PathBuf::from(format!("{}_analytics.json", session.call_id)),
            minutes: PathBuf::from(format!("{}.txt", session.call_id)),
        })
    }
}
