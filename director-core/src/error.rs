//! Crate-wide error type.
//!
//! Mirrors the structural error kinds of the error handling design: kinds
//! that surface to the caller (spawn/init failures, bad directories), and
//! kinds that are absorbed at the site where they occur (pipe-broken during
//! shutdown, one corrupt transcript line) never reach this enum at all —
//! they are logged and swallowed where they happen.

use crate::model::SessionId;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("pty initialization failed: {0}")]
    PtyInitFailed(String),

    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("backend already started")]
    AlreadyStarted,

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    #[error("agent session id {0} is already bound to a different session")]
    AgentSessionAlreadyBound(String),

    #[error("embedded backend is not supported on this platform")]
    EmbeddedNotSupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DirectorError>;
