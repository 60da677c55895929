//! SessionManager (C8): owns the two routing maps and is the single entry
//! point for creating, binding, persisting, and tearing down sessions.

use crate::backend::{PipeBackend, PtyBackend, SessionBackend};
use crate::config::DirectorConfig;
use crate::error::{DirectorError, Result};
use crate::model::{AgentSessionId, BackendKind, FileVerification, SessionId};
use crate::persistence::{PersistedSession, SessionStateLoad, SessionStateStore};
use crate::session::Session;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of loading persisted sessions: a restore plan, not yet applied.
#[derive(Debug, Default)]
pub struct RestorePlan {
    pub sessions: Vec<PersistedSession>,
    pub file_existed_but_failed: bool,
    pub scrubbed_duplicate_agent_session_ids: Vec<AgentSessionId>,
}

pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    routing: Arc<DashMap<AgentSessionId, SessionId>>,
    config: DirectorConfig,
}

impl SessionManager {
    pub fn new(config: DirectorConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            routing: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| e.clone())
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    fn select_pty_backend(kind: BackendKind) -> Result<Arc<dyn SessionBackend>> {
        match kind {
            BackendKind::UnixPty => {
                #[cfg(unix)]
                {
                    Ok(Arc::new(PtyBackend::new_unix_pty()?))
                }
                #[cfg(not(unix))]
                {
                    Err(DirectorError::BackendUnavailable(
                        "unix pty backend requested on a non-unix platform".to_string(),
                    ))
                }
            }
            BackendKind::ConPty => {
                #[cfg(windows)]
                {
                    Ok(Arc::new(PtyBackend::new_conpty()?))
                }
                #[cfg(not(windows))]
                {
                    Err(DirectorError::BackendUnavailable(
                        "conpty backend requested on a non-windows platform".to_string(),
                    ))
                }
            }
            BackendKind::Pipe => Ok(Arc::new(PipeBackend::new())),
            BackendKind::Embedded => Err(DirectorError::EmbeddedNotSupported),
        }
    }

    /// Creates and starts a PTY-attached session (ConPty on Windows, Unix
    /// pty elsewhere). If `resume_agent_session_id` is given, it is
    /// pre-bound into the routing map before the backend ever starts, so an
    /// orphaned process sharing that id cannot hijack this session.
    pub async fn create_session(
        &self,
        repo: &Path,
        exe: String,
        args: Vec<String>,
        backend_kind: BackendKind,
        resume_agent_session_id: Option<AgentSessionId>,
    ) -> Result<Arc<Session>> {
        if !repo.is_dir() {
            return Err(DirectorError::DirectoryNotFound(repo.to_path_buf()));
        }

        let backend = Self::select_pty_backend(backend_kind)?;
        let session = Arc::new(Session::new(
            repo.to_path_buf(),
            repo.to_path_buf(),
            backend_kind,
            backend,
            self.config.clone(),
        ));

        let mut args = args;
        if let Some(resume_id) = resume_agent_session_id.clone() {
            args.push("--resume".to_string());
            args.push(resume_id.0.clone());
            session.pre_bind_agent_session_id(resume_id.clone());
            self.bind_routing(resume_id, session.id())?;
        }

        session.start(exe, args).await?;
        self.sessions.insert(session.id(), session.clone());
        Ok(session)
    }

    /// Convenience constructor for the pipe-mode backend kind.
    pub async fn create_pipe_mode_session(
        &self,
        repo: &Path,
        exe: String,
        args: Vec<String>,
    ) -> Result<Arc<Session>> {
        self.create_session(repo, exe, args, BackendKind::Pipe, None)
            .await
    }

    /// Embedded mode is Windows-only and the backend is provided by the UI
    /// layer, which already owns the pseudo-console handle.
    pub async fn create_embedded_session(
        &self,
        repo: &Path,
        backend: Arc<dyn SessionBackend>,
    ) -> Result<Arc<Session>> {
        if !repo.is_dir() {
            return Err(DirectorError::DirectoryNotFound(repo.to_path_buf()));
        }
        #[cfg(not(windows))]
        return Err(DirectorError::EmbeddedNotSupported);

        #[cfg(windows)]
        {
            let session = Arc::new(Session::new(
                repo.to_path_buf(),
                repo.to_path_buf(),
                BackendKind::Embedded,
                backend,
                self.config.clone(),
            ));
            self.sessions.insert(session.id(), session.clone());
            Ok(session)
        }
    }

    pub async fn kill_session(&self, id: SessionId) -> Result<()> {
        let session = self.get(&id).ok_or(DirectorError::SessionNotFound(id))?;
        session.kill(self.config.graceful_shutdown_timeout).await;
        Ok(())
    }

    fn bind_routing(&self, agent_session_id: AgentSessionId, session_id: SessionId) -> Result<()> {
        if let Some(existing) = self.routing.get(&agent_session_id) {
            if *existing != session_id {
                return Err(DirectorError::AgentSessionAlreadyBound(
                    agent_session_id.0.clone(),
                ));
            }
            return Ok(());
        }
        self.routing.insert(agent_session_id, session_id);
        Ok(())
    }

    /// Binds `agent_session_id` to `session_id`. Refuses to silently
    /// overwrite an existing, different binding. On success, triggers file
    /// verification and, if verified, promotes terminal verification to
    /// `Matched`.
    pub fn register_agent_session(
        &self,
        agent_session_id: AgentSessionId,
        session_id: SessionId,
    ) -> Result<()> {
        let session = self
            .get(&session_id)
            .ok_or(DirectorError::SessionNotFound(session_id))?;

        self.bind_routing(agent_session_id.clone(), session_id)?;
        session.pre_bind_agent_session_id(agent_session_id.clone());

        if session.verify_agent_session() == FileVerification::Verified {
            session.mark_as_pre_verified();
        }

        info!(%session_id, agent_session_id = %agent_session_id, "agent session registered");
        Ok(())
    }

    /// Explicit rebind: clears any prior binding for `session_id` before
    /// registering the new one.
    pub fn relink_agent_session(
        &self,
        session_id: SessionId,
        new_agent_session_id: AgentSessionId,
    ) -> Result<()> {
        self.routing.retain(|_, sid| *sid != session_id);
        self.register_agent_session(new_agent_session_id, session_id)
    }

    /// Heuristic lookup used by the router for auto-registration: a
    /// running session whose repo matches `cwd` and whose routing slot is
    /// still empty.
    pub fn find_unmatched_session(&self, cwd: Option<&Path>) -> Option<Arc<Session>> {
        let bound: std::collections::HashSet<SessionId> =
            self.routing.iter().map(|e| *e.value()).collect();

        self.sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| !s.status().is_terminal() && !bound.contains(&s.id()))
            .find(|s| match cwd {
                Some(cwd) => s.working_dir() == cwd,
                None => true,
            })
    }

    /// Serializes every running session plus any session with a known
    /// AgentSessionId. `sort_order` comes from each session's own
    /// creation-sequence counter rather than `DashMap` iteration order,
    /// which is unordered and would otherwise vary save to save.
    pub fn save_current_state(&self, store: &SessionStateStore) -> Result<()> {
        let mut persisted: Vec<PersistedSession> = self
            .sessions
            .iter()
            .filter_map(|e| {
                let session = e.value();
                let agent_session_id = session.agent_session_id();
                if !session.status().is_terminal() || agent_session_id.is_some() {
                    Some(PersistedSession {
                        id: session.id(),
                        repo_path: session.repo_path().to_path_buf(),
                        working_dir: session.working_dir().to_path_buf(),
                        backend_kind: session.backend_kind(),
                        agent_session_id,
                        expected_first_prompt: None,
                        created_at: chrono::Utc::now(),
                        sort_order: session.creation_seq() as i64,
                        pid: session.process_id(),
                        display_name: session.display_name(),
                        color: session.color(),
                        draft: session.draft(),
                    })
                } else {
                    None
                }
            })
            .collect();

        persisted.sort_by_key(|p| p.sort_order);
        store.save(&persisted)?;
        Ok(())
    }

    /// Reads persisted sessions, scrubbing duplicate `AgentSessionId`
    /// bindings (later entries lose the id so they re-bind fresh).
    pub fn load_persisted_sessions(&self, store: &SessionStateStore) -> RestorePlan {
        let SessionStateLoad {
            mut sessions,
            file_existed_but_failed,
            ..
        } = store.load();

        let mut seen = std::collections::HashSet::new();
        let mut scrubbed = Vec::new();
        for persisted in &mut sessions {
            if let Some(agent_session_id) = &persisted.agent_session_id {
                if !seen.insert(agent_session_id.clone()) {
                    scrubbed.push(agent_session_id.clone());
                    persisted.agent_session_id = None;
                }
            }
        }

        RestorePlan {
            sessions,
            file_existed_but_failed,
            scrubbed_duplicate_agent_session_ids: scrubbed,
        }
    }

    /// For the UI to reattach an embedded-mode session it already owns the
    /// backend for. On a duplicate `AgentSessionId` the id is cleared to
    /// force fresh binding instead of colliding with a live session.
    pub async fn restore_embedded_session(
        &self,
        persisted: PersistedSession,
        backend: Arc<dyn SessionBackend>,
    ) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(
            persisted.repo_path.clone(),
            persisted.working_dir.clone(),
            persisted.backend_kind,
            backend,
            self.config.clone(),
        ));
        session.set_display_name(persisted.display_name);
        session.set_color(persisted.color);
        session.set_draft(persisted.draft);

        if let Some(agent_session_id) = persisted.agent_session_id {
            if self.bind_routing(agent_session_id.clone(), session.id()).is_ok() {
                session.pre_bind_agent_session_id(agent_session_id);
                session.mark_as_pre_verified();
            }
        }

        self.sessions.insert(session.id(), session.clone());
        Ok(session)
    }

    /// Enumerates agent processes by image name on startup and logs them.
    /// Never attempts adoption — ConPTY/Unix-pty handles are process-local
    /// and cannot be re-attached across a host restart.
    pub fn scan_for_orphans(&self, process_image_name: &str) {
        #[cfg(unix)]
        {
            let Ok(entries) = std::fs::read_dir("/proc") else {
                return;
            };
            for entry in entries.flatten() {
                let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
                    continue;
                };
                if comm.trim() == process_image_name {
                    warn!(pid = ?entry.file_name(), "found orphaned agent process, not adopting");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = process_image_name;
        }
    }

    pub async fn kill_all_sessions(&self) {
        for session in self.list() {
            session.kill(self.config.graceful_shutdown_timeout).await;
        }
    }

    pub fn remove_session(&self, id: SessionId) {
        self.sessions.remove(&id);
        self.routing.retain(|_, sid| *sid != id);
    }

    pub async fn dispose(&self) {
        self.kill_all_sessions().await;
        self.sessions.clear();
        self.routing.clear();
    }
}
