//! SessionStateStore: a single JSON file holding every persisted session,
//! saved atomically (write-then-rename) so a reader never observes a
//! half-written file.

use crate::model::{AgentSessionId, BackendKind, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One session's durable metadata: enough to relaunch a fresh backend with
/// the resume argument and reconstruct continuity from the agent's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: SessionId,
    pub repo_path: PathBuf,
    pub working_dir: PathBuf,
    pub backend_kind: BackendKind,
    pub agent_session_id: Option<AgentSessionId>,
    pub expected_first_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sort_order: i64,
    /// Host OS process id at save time, used to signal a still-running
    /// process from a separate CLI invocation (PTY handles themselves are
    /// not cross-process, but the OS pid is).
    pub pid: Option<u32>,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub draft: Option<String>,
}

/// Outcome of a load: never an exception, always inspectable by the caller.
#[derive(Debug, Default)]
pub struct SessionStateLoad {
    pub sessions: Vec<PersistedSession>,
    pub file_existed_but_failed: bool,
    pub diagnostic: Option<String>,
}

pub struct SessionStateStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl SessionStateStore {
    pub fn new(path: PathBuf, backup_path: PathBuf) -> Self {
        Self { path, backup_path }
    }

    /// Serialize `sessions` and write atomically: a sibling temp file is
    /// written first, then renamed over the target.
    pub fn save(&self, sessions: &[PersistedSession]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(sessions)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Reads and parses the state file. A missing file is not a failure —
    /// it simply yields an empty list. A malformed file sets
    /// `file_existed_but_failed` with a diagnostic; the caller decides
    /// whether to ignore, back up, or clear it.
    pub fn load(&self) -> SessionStateLoad {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return SessionStateLoad::default();
            }
            Err(err) => {
                return SessionStateLoad {
                    sessions: Vec::new(),
                    file_existed_but_failed: true,
                    diagnostic: Some(err.to_string()),
                };
            }
        };

        match serde_json::from_str::<Vec<PersistedSession>>(&raw) {
            Ok(sessions) => SessionStateLoad {
                sessions,
                file_existed_but_failed: false,
                diagnostic: None,
            },
            Err(err) => {
                warn!(path = %self.path.display(), %err, "session state file is malformed");
                SessionStateLoad {
                    sessions: Vec::new(),
                    file_existed_but_failed: true,
                    diagnostic: Some(err.to_string()),
                }
            }
        }
    }

    /// Copies the current state file to its `.bak` sibling before a caller
    /// clears it, so a malformed load is recoverable for inspection.
    pub fn backup_before_clear(&self) -> std::io::Result<()> {
        if self.path.exists() {
            std::fs::copy(&self.path, &self.backup_path)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> std::io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sort_order: i64) -> PersistedSession {
        PersistedSession {
            id: SessionId::new(),
            repo_path: PathBuf::from("/tmp/repo"),
            working_dir: PathBuf::from("/tmp/repo"),
            backend_kind: BackendKind::UnixPty,
            agent_session_id: Some(AgentSessionId("abc".to_string())),
            expected_first_prompt: Some("hello there".to_string()),
            created_at: Utc::now(),
            sort_order,
            pid: None,
            display_name: None,
            color: None,
            draft: None,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(
            tmp.path().join("sessions.json"),
            tmp.path().join("sessions.json.bak"),
        );
        let sessions = vec![sample(0), sample(1)];
        store.save(&sessions).unwrap();

        let loaded = store.load();
        assert!(!loaded.file_existed_but_failed);
        assert_eq!(loaded.sessions.len(), 2);
    }

    #[test]
    fn missing_file_loads_as_empty_without_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStateStore::new(
            tmp.path().join("sessions.json"),
            tmp.path().join("sessions.json.bak"),
        );
        let loaded = store.load();
        assert!(!loaded.file_existed_but_failed);
        assert!(loaded.sessions.is_empty());
    }

    #[test]
    fn malformed_file_reports_failure_and_keeps_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        std::fs::write(&path, "not json").unwrap();
        let store = SessionStateStore::new(path.clone(), tmp.path().join("sessions.json.bak"));

        let loaded = store.load();
        assert!(loaded.file_existed_but_failed);
        assert!(path.exists());
    }
}
