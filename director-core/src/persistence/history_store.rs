//! SessionHistoryStore: one JSON file per history entry under a
//! subdirectory, so corruption of one entry never threatens the rest.

use crate::model::AgentSessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub agent_session_id: Option<AgentSessionId>,
    pub repo_path: PathBuf,
    pub first_prompt_snippet: Option<String>,
    pub summary: Option<String>,
    pub last_used_at: DateTime<Utc>,
}

pub struct SessionHistoryStore {
    dir: PathBuf,
}

impl SessionHistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, entry: &HistoryEntry) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(entry)?;
        std::fs::write(self.entry_path(&entry.id), json)
    }

    /// Lists every history entry, newest-first by `last_used_at`. Corrupt
    /// files are skipped with a warning rather than failing the whole load.
    pub fn load_all(&self) -> Vec<HistoryEntry> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut entries: Vec<HistoryEntry> = read_dir
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| match std::fs::read_to_string(e.path()) {
                Ok(raw) => match serde_json::from_str::<HistoryEntry>(&raw) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(path = %e.path().display(), %err, "skipping corrupt history entry");
                        None
                    }
                },
                Err(err) => {
                    warn!(path = %e.path().display(), %err, "failed reading history entry");
                    None
                }
            })
            .collect();

        entries.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        entries
    }

    /// The newest entry matching `agent_session_id`, if any.
    pub fn find_by_agent_session_id(&self, agent_session_id: &AgentSessionId) -> Option<HistoryEntry> {
        self.load_all()
            .into_iter()
            .find(|e| e.agent_session_id.as_ref() == Some(agent_session_id))
    }

    pub fn delete(&self, id: &str) -> std::io::Result<()> {
        let path = self.entry_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, agent_session_id: &str, last_used_at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            agent_session_id: Some(AgentSessionId(agent_session_id.to_string())),
            repo_path: PathBuf::from("/tmp/repo"),
            first_prompt_snippet: Some("hello there, this is a prompt".to_string()),
            summary: None,
            last_used_at,
        }
    }

    #[test]
    fn load_all_sorts_newest_first_and_skips_corrupt_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionHistoryStore::new(tmp.path().to_path_buf());

        let older = entry("a", "agent-a", Utc::now() - chrono::Duration::hours(2));
        let newer = entry("b", "agent-b", Utc::now());
        store.save(&older).unwrap();
        store.save(&newer).unwrap();
        std::fs::write(tmp.path().join("corrupt.json"), "not json").unwrap();

        let all = store.load_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "b");
        assert_eq!(all[1].id, "a");
    }

    #[test]
    fn find_by_agent_session_id_returns_newest_match() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionHistoryStore::new(tmp.path().to_path_buf());
        store.save(&entry("a", "shared", Utc::now() - chrono::Duration::hours(1))).unwrap();
        store.save(&entry("b", "shared", Utc::now())).unwrap();

        let found = store
            .find_by_agent_session_id(&AgentSessionId("shared".to_string()))
            .unwrap();
        assert_eq!(found.id, "b");
    }

    #[test]
    fn delete_removes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionHistoryStore::new(tmp.path().to_path_buf());
        store.save(&entry("a", "agent-a", Utc::now())).unwrap();
        store.delete("a").unwrap();
        assert!(store.load_all().is_empty());
    }
}
