//! EventRouter (C10): binds incoming hook events to sessions and dispatches
//! them, guarding against a stale agent process hijacking the wrong session.

use crate::manager::SessionManager;
use crate::model::{FileVerification, HookEvent};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub type RawMessageCallback = Arc<dyn Fn(&HookEvent) + Send + Sync>;

pub struct EventRouter {
    manager: Arc<SessionManager>,
    on_raw_message: Option<RawMessageCallback>,
}

impl EventRouter {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            on_raw_message: None,
        }
    }

    pub fn set_on_raw_message(&mut self, callback: RawMessageCallback) {
        self.on_raw_message = Some(callback);
    }

    pub fn route(&self, event: HookEvent) {
        if let Some(cb) = &self.on_raw_message {
            cb(&event);
        }

        let Some(agent_session_id) = event.agent_session_id() else {
            debug!("dropping hook event without an agent session id");
            return;
        };

        let session = self
            .manager
            .list()
            .into_iter()
            .find(|s| s.agent_session_id().as_ref() == Some(&agent_session_id));

        let session = match session {
            Some(session) => session,
            None => {
                let cwd = event.cwd.as_deref().map(Path::new);
                let Some(candidate) = self.manager.find_unmatched_session(cwd) else {
                    debug!(%agent_session_id, "no candidate session for unmatched agent session id");
                    return;
                };

                if candidate.verify_candidate_agent_session(&agent_session_id) != FileVerification::Verified {
                    debug!(
                        %agent_session_id,
                        session_id = %candidate.id(),
                        "orphan guard: refusing to auto-register unverified candidate"
                    );
                    return;
                }

                if self
                    .manager
                    .register_agent_session(agent_session_id, candidate.id())
                    .is_err()
                {
                    return;
                }
                candidate
            }
        };

        session.handle_hook_event(&event);
    }
}
