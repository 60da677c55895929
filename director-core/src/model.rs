//! Shared data-model types (§3): identifiers, lifecycle and activity
//! enums, and the two-stage verification state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, locally generated session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier minted by the agent, used to correlate hook events and
/// transcript files. Newtype over `String` rather than `Uuid` because the
/// agent's id is UUID-*shaped* but treated as an opaque token — the router
/// never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentSessionId(pub String);

impl fmt::Display for AgentSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentSessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentSessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Process-lifecycle status. Terminal states never transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Starting,
    Running,
    Exiting,
    Exited,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Exited | SessionStatus::Failed)
    }
}

/// Cognitive state of the agent inside a session, distinct from
/// [`SessionStatus`]. Driven by hook events (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Starting,
    Idle,
    Working,
    WaitingForInput,
    WaitingForPermission,
    Exited,
}

/// Terminal-content identity check (§4.6b).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalVerification {
    Waiting,
    Potential,
    Matched,
    Failed,
}

/// On-disk transcript re-check (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileVerification {
    NotLinked,
    Verified,
    ContentMismatch,
    FileMissing,
}

/// A single hook event relayed over the IPC transport (§6.3). Field names
/// mirror the agent's own wire schema, including its snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub hook_event_name: String,
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub notification_type: Option<String>,
    pub timestamp: Option<String>,
    /// Stamped by the IPC server on receipt; absent on the wire.
    #[serde(default)]
    pub received_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl HookEvent {
    pub fn agent_session_id(&self) -> Option<AgentSessionId> {
        self.session_id.clone().map(AgentSessionId)
    }

    pub fn is_permission_prompt_notification(&self) -> bool {
        self.hook_event_name == "Notification"
            && self.notification_type.as_deref() == Some("permission_prompt")
    }
}

/// Backend transport kind, selected at session-creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    ConPty,
    UnixPty,
    Pipe,
    Embedded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_round_trips_through_string() {
        let id = SessionId::new();
        let parsed = SessionId::parse_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn terminal_statuses_are_identified_correctly() {
        assert!(SessionStatus::Exited.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Exiting.is_terminal());
    }
}
