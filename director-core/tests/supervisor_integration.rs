//! Integration tests exercising the manager, router, transcript, and
//! persistence layers together through a fake backend (no real PTY or
//! agent process involved).

use async_trait::async_trait;
use chrono::Utc;
use director_core::backend::{ExitCallback, SessionBackend, StartSpec, StatusCallback};
use director_core::buffer::CircularTerminalBuffer;
use director_core::config::DirectorConfig;
use director_core::model::{AgentSessionId, BackendKind, FileVerification, HookEvent, SessionStatus};
use director_core::persistence::{PersistedSession, SessionStateStore};
use director_core::router::EventRouter;
use director_core::{DirectorError, SessionManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct FakeBackend {
    status: Mutex<SessionStatus>,
    running: AtomicBool,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            status: Mutex::new(SessionStatus::Running),
            running: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn start(&self, _spec: StartSpec) -> director_core::Result<()> {
        Ok(())
    }
    fn write(&self, _bytes: &[u8]) {}
    async fn send_text(&self, _text: &str) -> director_core::Result<()> {
        Ok(())
    }
    async fn send_enter(&self) -> director_core::Result<()> {
        Ok(())
    }
    fn resize(&self, _cols: u16, _rows: u16) {}
    async fn graceful_shutdown(&self, _timeout: std::time::Duration) {
        self.running.store(false, Ordering::SeqCst);
        *self.status.lock().unwrap() = SessionStatus::Exited;
    }
    fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>> {
        None
    }
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
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

fn write_transcript(project_dir: &std::path::Path, agent_session_id: &str, prompt: &str) {
    std::fs::create_dir_all(project_dir).unwrap();
    let path = project_dir.join(format!("{agent_session_id}.jsonl"));
    std::fs::write(
        &path,
        format!(r#"{{"type":"user","message":{{"content":"{prompt}"}}}}"#),
    )
    .unwrap();
}

fn test_config(tmp: &std::path::Path) -> DirectorConfig {
    let mut config = DirectorConfig::default();
    config.app_data_root = tmp.join("data");
    config.transcripts_root = tmp.join("transcripts");
    config
}

#[tokio::test]
async fn fresh_session_matches_transcript_on_registration() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());

    let long_prompt = "please implement the new feature end to end".repeat(2);
    let project_dir = director_core::transcript::project_transcript_dir(&config.transcripts_root, &repo);
    write_transcript(&project_dir, "agent-123", &long_prompt);

    let manager = SessionManager::new(config);
    let persisted = PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };
    let session = manager
        .restore_embedded_session(persisted, Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    manager
        .register_agent_session(AgentSessionId("agent-123".to_string()), session.id())
        .unwrap();

    assert_eq!(session.file_verification(), FileVerification::Verified);
    assert_eq!(
        session.terminal_verification(),
        director_core::model::TerminalVerification::Matched
    );
}

#[tokio::test]
async fn orphan_hijack_is_prevented_without_a_verified_transcript() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());

    let manager = Arc::new(SessionManager::new(config));
    let persisted = PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };
    let session = manager
        .restore_embedded_session(persisted, Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    let router = EventRouter::new(manager.clone());
    let event = HookEvent {
        hook_event_name: "UserPromptSubmit".to_string(),
        session_id: Some("stale-agent-id".to_string()),
        cwd: Some(repo.to_string_lossy().to_string()),
        notification_type: None,
        timestamp: None,
        received_at: None,
    };
    router.route(event);

    assert_eq!(session.agent_session_id(), None);
    assert_eq!(session.activity_state(), director_core::model::ActivityState::Starting);
}

#[tokio::test]
async fn duplicate_agent_session_ids_are_scrubbed_on_load() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let store = SessionStateStore::new(
        config.sessions_state_path(),
        config.sessions_state_backup_path(),
    );

    let shared_id = AgentSessionId("dup-id".to_string());
    let sessions = vec![
        PersistedSession {
            id: director_core::SessionId::new(),
            repo_path: tmp.path().to_path_buf(),
            working_dir: tmp.path().to_path_buf(),
            backend_kind: BackendKind::UnixPty,
            agent_session_id: Some(shared_id.clone()),
            expected_first_prompt: None,
            created_at: Utc::now(),
            sort_order: 0,
            pid: None,
            display_name: None,
            color: None,
            draft: None,
        },
        PersistedSession {
            id: director_core::SessionId::new(),
            repo_path: tmp.path().to_path_buf(),
            working_dir: tmp.path().to_path_buf(),
            backend_kind: BackendKind::UnixPty,
            agent_session_id: Some(shared_id.clone()),
            expected_first_prompt: None,
            created_at: Utc::now(),
            sort_order: 1,
            pid: None,
            display_name: None,
            color: None,
            draft: None,
        },
    ];
    store.save(&sessions).unwrap();

    let manager = SessionManager::new(config);
    let plan = manager.load_persisted_sessions(&store);

    assert!(!plan.file_existed_but_failed);
    let with_id = plan
        .sessions
        .iter()
        .filter(|p| p.agent_session_id.is_some())
        .count();
    assert_eq!(with_id, 1);
    assert_eq!(plan.scrubbed_duplicate_agent_session_ids.len(), 1);
}

#[tokio::test]
async fn registering_a_different_session_to_a_bound_agent_id_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());
    let manager = SessionManager::new(config);

    let make_persisted = || PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };

    let session_a = manager
        .restore_embedded_session(make_persisted(), Arc::new(FakeBackend::new()))
        .await
        .unwrap();
    let session_b = manager
        .restore_embedded_session(make_persisted(), Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    let agent_id = AgentSessionId("agent-shared".to_string());
    manager.register_agent_session(agent_id.clone(), session_a.id()).unwrap();

    let result = manager.register_agent_session(agent_id, session_b.id());
    assert!(matches!(result, Err(DirectorError::AgentSessionAlreadyBound(_))));
}

#[tokio::test]
async fn terminal_match_at_95_percent_containment_binds_and_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());

    let prompts: Vec<String> = (0..20).map(|i| format!("task-{i:04}")).collect();
    let project_dir = director_core::transcript::project_transcript_dir(&config.transcripts_root, &repo);
    std::fs::create_dir_all(&project_dir).unwrap();
    let lines: Vec<String> = prompts
        .iter()
        .map(|p| format!(r#"{{"type":"user","message":{{"content":"{p}"}}}}"#))
        .collect();
    std::fs::write(project_dir.join("agent-95.jsonl"), lines.join("\n")).unwrap();

    let manager = SessionManager::new(config);
    let persisted = PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };
    let session = manager
        .restore_embedded_session(persisted, Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    // 19 of 20 prompts visible in terminal output: ratio 0.95, meets the
    // match threshold even though one prompt never scrolled into view.
    let visible = prompts[..19].join("\n");
    session.verify_with_terminal_content(&visible, 55);

    assert_eq!(
        session.terminal_verification(),
        director_core::model::TerminalVerification::Matched
    );
    assert_eq!(session.agent_session_id(), Some(AgentSessionId("agent-95".to_string())));
}

#[tokio::test]
async fn terminal_match_below_95_percent_containment_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());

    let prompts: Vec<String> = (0..20).map(|i| format!("task-{i:04}")).collect();
    let project_dir = director_core::transcript::project_transcript_dir(&config.transcripts_root, &repo);
    std::fs::create_dir_all(&project_dir).unwrap();
    let lines: Vec<String> = prompts
        .iter()
        .map(|p| format!(r#"{{"type":"user","message":{{"content":"{p}"}}}}"#))
        .collect();
    std::fs::write(project_dir.join("agent-below-95.jsonl"), lines.join("\n")).unwrap();

    let manager = SessionManager::new(config);
    let persisted = PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };
    let session = manager
        .restore_embedded_session(persisted, Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    // Only 18 of 20 prompts visible: ratio 0.9, under the 0.95 threshold.
    let visible = prompts[..18].join("\n");
    session.verify_with_terminal_content(&visible, 55);

    assert_eq!(
        session.terminal_verification(),
        director_core::model::TerminalVerification::Failed
    );
    assert_eq!(session.agent_session_id(), None);
}

#[tokio::test]
async fn create_session_resume_path_recovers_after_a_crash() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());

    let long_prompt = "resume the work from before the crash please".repeat(2);
    let project_dir = director_core::transcript::project_transcript_dir(&config.transcripts_root, &repo);
    write_transcript(&project_dir, "crashed-agent", &long_prompt);

    let manager = SessionManager::new(config);

    // A prior run died mid-session; the next launch resumes the same agent
    // session id through the pipe backend (no real agent binary needed —
    // PipeBackend::start only records the spec, it spawns nothing).
    let session = manager
        .create_session(
            &repo,
            "true".to_string(),
            vec![],
            BackendKind::Pipe,
            Some(AgentSessionId("crashed-agent".to_string())),
        )
        .await
        .unwrap();

    assert_eq!(session.agent_session_id(), Some(AgentSessionId("crashed-agent".to_string())));
    assert_eq!(session.verify_agent_session(), FileVerification::Verified);
}

#[tokio::test]
async fn kill_session_transitions_to_a_terminal_status() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let config = test_config(tmp.path());
    let manager = SessionManager::new(config);

    let persisted = PersistedSession {
        id: director_core::SessionId::new(),
        repo_path: repo.clone(),
        working_dir: repo.clone(),
        backend_kind: BackendKind::UnixPty,
        agent_session_id: None,
        expected_first_prompt: None,
        created_at: Utc::now(),
        sort_order: 0,
        pid: None,
        display_name: None,
        color: None,
        draft: None,
    };
    let session = manager
        .restore_embedded_session(persisted, Arc::new(FakeBackend::new()))
        .await
        .unwrap();

    manager.kill_session(session.id()).await.unwrap();
    assert!(session.status().is_terminal());
}
