//! Session (C6): multiplexes user intent, backend I/O, and hook events for
//! one supervised agent process.

use crate::backend::{SessionBackend, StartSpec};
use crate::buffer::CircularTerminalBuffer;
use crate::config::DirectorConfig;
use crate::error::Result;
use crate::model::{
    ActivityState, AgentSessionId, BackendKind, FileVerification, HookEvent, SessionId,
    SessionStatus, TerminalVerification,
};
use crate::transcript;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Monotonic counter assigning each session a stable creation order,
/// independent of `DashMap`'s unordered iteration — this is what
/// `SessionManager::save_current_state` persists as `sort_order`.
static CREATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// A read-only view of a session's state, cheap to clone and safe to hand to
/// UI or persistence code without exposing the live backend.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub repo_path: PathBuf,
    pub working_dir: PathBuf,
    pub backend_kind: BackendKind,
    pub agent_session_id: Option<AgentSessionId>,
    pub status: SessionStatus,
    pub activity_state: ActivityState,
    pub terminal_verification: TerminalVerification,
    pub file_verification: FileVerification,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub draft: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct Session {
    id: SessionId,
    repo_path: PathBuf,
    working_dir: PathBuf,
    backend_kind: BackendKind,
    backend: Arc<dyn SessionBackend>,
    config: DirectorConfig,
    created_at: DateTime<Utc>,
    creation_seq: u64,

    agent_session_id: RwLock<Option<AgentSessionId>>,
    activity_state: RwLock<ActivityState>,
    terminal_verification: RwLock<TerminalVerification>,
    file_verification: RwLock<FileVerification>,
    expected_first_prompt: RwLock<Option<String>>,
    verified_first_prompt: RwLock<Option<String>>,
    display_name: RwLock<Option<String>>,
    color: RwLock<Option<String>>,
    draft: RwLock<Option<String>>,

    terminal_verification_in_progress: AtomicBool,
}

impl Session {
    pub fn new(
        repo_path: PathBuf,
        working_dir: PathBuf,
        backend_kind: BackendKind,
        backend: Arc<dyn SessionBackend>,
        config: DirectorConfig,
    ) -> Self {
        Self {
            id: SessionId::new(),
            repo_path,
            working_dir,
            backend_kind,
            backend,
            config,
            created_at: Utc::now(),
            creation_seq: CREATION_SEQ.fetch_add(1, Ordering::SeqCst),
            agent_session_id: RwLock::new(None),
            activity_state: RwLock::new(ActivityState::Starting),
            terminal_verification: RwLock::new(TerminalVerification::Waiting),
            file_verification: RwLock::new(FileVerification::NotLinked),
            expected_first_prompt: RwLock::new(None),
            verified_first_prompt: RwLock::new(None),
            display_name: RwLock::new(None),
            color: RwLock::new(None),
            draft: RwLock::new(None),
            terminal_verification_in_progress: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn repo_path(&self) -> &std::path::Path {
        &self.repo_path
    }

    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn creation_seq(&self) -> u64 {
        self.creation_seq
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().expect("lock poisoned").clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        *self.display_name.write().expect("lock poisoned") = name;
    }

    pub fn color(&self) -> Option<String> {
        self.color.read().expect("lock poisoned").clone()
    }

    pub fn set_color(&self, color: Option<String>) {
        *self.color.write().expect("lock poisoned") = color;
    }

    pub fn draft(&self) -> Option<String> {
        self.draft.read().expect("lock poisoned").clone()
    }

    pub fn set_draft(&self, draft: Option<String>) {
        *self.draft.write().expect("lock poisoned") = draft;
    }

    pub fn status(&self) -> SessionStatus {
        self.backend.status()
    }

    pub fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>> {
        self.backend.buffer()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.backend.process_id()
    }

    pub fn agent_session_id(&self) -> Option<AgentSessionId> {
        self.agent_session_id.read().expect("lock poisoned").clone()
    }

    pub fn activity_state(&self) -> ActivityState {
        *self.activity_state.read().expect("lock poisoned")
    }

    pub fn terminal_verification(&self) -> TerminalVerification {
        *self.terminal_verification.read().expect("lock poisoned")
    }

    pub fn file_verification(&self) -> FileVerification {
        *self.file_verification.read().expect("lock poisoned")
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            repo_path: self.repo_path.clone(),
            working_dir: self.working_dir.clone(),
            backend_kind: self.backend_kind,
            agent_session_id: self.agent_session_id(),
            status: self.status(),
            activity_state: self.activity_state(),
            terminal_verification: self.terminal_verification(),
            file_verification: self.file_verification(),
            display_name: self.display_name(),
            color: self.color(),
            draft: self.draft(),
            created_at: self.created_at,
        }
    }

    pub async fn start(&self, exe: String, args: Vec<String>) -> Result<()> {
        let (cols, rows) = self.config.initial_pty_size;
        self.backend
            .start(StartSpec {
                exe,
                args,
                cwd: self.working_dir.clone(),
                cols,
                rows,
            })
            .await
    }

    /// Called by the manager right after construction, before `start`, when
    /// restoring or resuming a known agent session — binds the id up front
    /// so an orphaned process with the same id cannot hijack this session.
    pub fn pre_bind_agent_session_id(&self, agent_session_id: AgentSessionId) {
        *self.agent_session_id.write().expect("lock poisoned") = Some(agent_session_id);
        self.backend
            .set_resume_agent_session_id(self.agent_session_id().map(|id| id.0));
    }

    fn set_activity_state(&self, state: ActivityState) {
        *self.activity_state.write().expect("lock poisoned") = state;
    }

    pub fn send_input(&self, bytes: &[u8]) {
        if self.status().is_terminal() {
            return;
        }
        self.backend.write(bytes);
        self.set_activity_state(ActivityState::Working);
    }

    /// Sends `text` followed by the line terminator. Payloads larger than
    /// the configured threshold are spilled to a temp file in the session's
    /// working directory and referenced with `@<path>` instead (§6.5).
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if self.status().is_terminal() {
            return Ok(());
        }

        if text.len() > self.config.large_input_threshold && self.working_dir.exists() {
            match self.spill_to_tempfile(text) {
                Ok(reference) => {
                    self.backend.send_text(&reference).await?;
                }
                Err(err) => {
                    debug!(%err, "large-input spill failed, sending inline");
                    self.backend.send_text(text).await?;
                }
            }
        } else {
            self.backend.send_text(text).await?;
        }

        self.set_activity_state(ActivityState::Working);
        Ok(())
    }

    fn spill_to_tempfile(&self, text: &str) -> std::io::Result<String> {
        let file_name = format!("cc_director_input_{}.txt", uuid::Uuid::new_v4());
        let path = self.working_dir.join(&file_name);
        std::fs::write(&path, text)?;
        Ok(format!("@{}", path.display()))
    }

    pub async fn send_enter(&self) -> Result<()> {
        self.backend.send_enter().await
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.backend.resize(cols, rows);
    }

    pub async fn kill(&self, timeout: std::time::Duration) {
        info!(session_id = %self.id, "killing session");
        self.backend.graceful_shutdown(timeout).await;
    }

    /// Drives the activity-state machine from an incoming hook event,
    /// honoring the sticky-green rule.
    pub fn handle_hook_event(&self, event: &HookEvent) {
        let current = self.activity_state();

        let leaves_waiting_for_input = matches!(
            event.hook_event_name.as_str(),
            "UserPromptSubmit" | "SessionEnd" | "PermissionRequest"
        ) || event.is_permission_prompt_notification();

        if current == ActivityState::WaitingForInput && !leaves_waiting_for_input {
            debug!(event = event.hook_event_name, "sticky-green: ignoring event");
            return;
        }

        let next = match event.hook_event_name.as_str() {
            "Stop" => Some(ActivityState::WaitingForInput),
            "Notification" if event.is_permission_prompt_notification() => {
                Some(ActivityState::WaitingForPermission)
            }
            "Notification" => Some(ActivityState::WaitingForInput),
            "PermissionRequest" => Some(ActivityState::WaitingForPermission),
            "UserPromptSubmit" | "PreToolUse" | "PostToolUse" | "PostToolUseFailure"
            | "SubagentStart" | "SubagentStop" | "TaskCompleted" => Some(ActivityState::Working),
            "SessionStart" => Some(ActivityState::Idle),
            "SessionEnd" => Some(ActivityState::Exited),
            _ => None,
        };

        if let Some(next) = next {
            self.set_activity_state(next);
        }
    }

    /// Checks whether `agent_session_id`'s transcript verifies against this
    /// session's repo path, without requiring the id to already be bound.
    /// Used by the router's orphan guard before auto-registration.
    pub fn verify_candidate_agent_session(&self, agent_session_id: &AgentSessionId) -> FileVerification {
        transcript::verify_session_file(
            &self.config.transcripts_root,
            &agent_session_id.0,
            &self.repo_path,
            None,
            self.config.min_verification_length,
        )
        .status
    }

    /// Re-checks the linked transcript file on disk, updating
    /// `FileVerification` and caching the verified first prompt.
    pub fn verify_agent_session(&self) -> FileVerification {
        let Some(agent_session_id) = self.agent_session_id() else {
            return FileVerification::NotLinked;
        };

        let expected = self.expected_first_prompt.read().expect("lock poisoned").clone();
        let result = transcript::verify_session_file(
            &self.config.transcripts_root,
            &agent_session_id.0,
            &self.repo_path,
            expected.as_deref(),
            self.config.min_verification_length,
        );

        *self.file_verification.write().expect("lock poisoned") = result.status;
        if result.status == FileVerification::Verified {
            *self.verified_first_prompt.write().expect("lock poisoned") =
                result.first_prompt_snippet;
        }
        result.status
    }

    /// For restored sessions that already carry an `AgentSessionId`: mark
    /// terminal verification `Matched` and suppress further probing.
    pub fn mark_as_pre_verified(&self) {
        *self.terminal_verification.write().expect("lock poisoned") = TerminalVerification::Matched;
        self.terminal_verification_in_progress.store(true, Ordering::SeqCst);
    }

    /// Runs terminal-based identity verification (§4.6b) against the
    /// current terminal `text`. `line_count` distinguishes a probe run
    /// (still accumulating output) from a confirmation run.
    pub fn verify_with_terminal_content(&self, text: &str, line_count: usize) {
        if self.terminal_verification() == TerminalVerification::Matched {
            return;
        }
        if self
            .terminal_verification_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let probe_run = line_count < crate::config::PROBE_RUN_LINE_THRESHOLD;
        let candidates = self.ordered_candidates();

        let mut best: Option<(transcript::TranscriptSummary, f64)> = None;
        for candidate in candidates {
            let prompts = transcript::extract_user_prompts(&candidate.jsonl_path).unwrap_or_default();
            if prompts.is_empty() {
                continue;
            }
            let matches = prompts.iter().filter(|p| text.contains(p.as_str())).count();
            let ratio = matches as f64 / prompts.len() as f64;
            if ratio >= self.config.terminal_match_ratio {
                best = Some((candidate, ratio));
                break;
            }
        }

        match best {
            Some((candidate, _ratio)) => {
                *self.agent_session_id.write().expect("lock poisoned") =
                    Some(AgentSessionId(candidate.id.clone()));

                if probe_run {
                    *self.terminal_verification.write().expect("lock poisoned") =
                        TerminalVerification::Potential;
                    // Probe runs do not commit; a later confirmation run may
                    // still supersede this. Allow future attempts.
                    self.terminal_verification_in_progress.store(false, Ordering::SeqCst);
                    return;
                }

                *self.expected_first_prompt.write().expect("lock poisoned") =
                    candidate.first_prompt.clone();
                *self.terminal_verification.write().expect("lock poisoned") =
                    TerminalVerification::Matched;
                self.verify_agent_session();
            }
            None => {
                if !probe_run {
                    *self.terminal_verification.write().expect("lock poisoned") =
                        TerminalVerification::Failed;
                } else {
                    self.terminal_verification_in_progress.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn ordered_candidates(&self) -> Vec<transcript::TranscriptSummary> {
        let project_dir =
            transcript::project_transcript_dir(&self.config.transcripts_root, &self.repo_path);
        let all = transcript::list_transcripts_in(&project_dir).unwrap_or_default();

        let one_hour_ago = self.created_at - chrono::Duration::hours(1);
        let (recent, rest): (Vec<_>, Vec<_>) = all.into_iter().partition(|c| {
            let modified: DateTime<Utc> = c.last_modified.into();
            modified >= one_hour_ago
        });

        recent.into_iter().chain(rest).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ExitCallback, StatusCallback};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeBackend {
        status: StdMutex<SessionStatus>,
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn start(&self, _spec: StartSpec) -> Result<()> {
            *self.status.lock().unwrap() = SessionStatus::Running;
            Ok(())
        }
        fn write(&self, _bytes: &[u8]) {}
        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_enter(&self) -> Result<()> {
            Ok(())
        }
        fn resize(&self, _cols: u16, _rows: u16) {}
        async fn graceful_shutdown(&self, _timeout: std::time::Duration) {
            *self.status.lock().unwrap() = SessionStatus::Exited;
        }
        fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>> {
            None
        }
        fn is_running(&self) -> bool {
            *self.status.lock().unwrap() == SessionStatus::Running
        }
        fn status(&self) -> SessionStatus {
            *self.status.lock().unwrap()
        }
        fn process_id(&self) -> Option<u32> {
            None
        }
        fn set_on_process_exited(&self, _callback: ExitCallback) {}
        fn set_on_status_changed(&self, _callback: StatusCallback) {}
    }

    fn make_session() -> Session {
        Session::new(
            PathBuf::from("."),
            PathBuf::from("."),
            BackendKind::UnixPty,
            Arc::new(FakeBackend {
                status: StdMutex::new(SessionStatus::Starting),
            }),
            DirectorConfig::default(),
        )
    }

    fn event(name: &str) -> HookEvent {
        HookEvent {
            hook_event_name: name.to_string(),
            session_id: None,
            cwd: None,
            notification_type: None,
            timestamp: None,
            received_at: None,
        }
    }

    #[test]
    fn sticky_green_blocks_subagent_stop_but_not_user_prompt_submit() {
        let session = make_session();
        session.handle_hook_event(&event("Stop"));
        assert_eq!(session.activity_state(), ActivityState::WaitingForInput);

        session.handle_hook_event(&event("SubagentStop"));
        assert_eq!(session.activity_state(), ActivityState::WaitingForInput);

        session.handle_hook_event(&event("UserPromptSubmit"));
        assert_eq!(session.activity_state(), ActivityState::Working);
    }

    #[test]
    fn permission_prompt_notification_escapes_waiting_for_input() {
        let session = make_session();
        session.handle_hook_event(&event("Stop"));

        let mut permission_event = event("Notification");
        permission_event.notification_type = Some("permission_prompt".to_string());
        session.handle_hook_event(&permission_event);

        assert_eq!(session.activity_state(), ActivityState::WaitingForPermission);
    }

    #[test]
    fn mark_as_pre_verified_suppresses_further_probing() {
        let session = make_session();
        session.mark_as_pre_verified();
        assert_eq!(session.terminal_verification(), TerminalVerification::Matched);

        session.verify_with_terminal_content("anything", 10);
        assert_eq!(session.terminal_verification(), TerminalVerification::Matched);
    }
}
