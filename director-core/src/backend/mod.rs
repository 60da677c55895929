//! Session backend capability (C4): the uniform contract `Session` consumes,
//! with three conforming variants — `ConPtyBackend`/`UnixPtyBackend` (a
//! persistent PTY-attached process) and `PipeBackend` (a fresh process per
//! prompt).

mod pipe_backend;
mod pty_backend;

pub use pipe_backend::PipeBackend;
pub use pty_backend::PtyBackend;

use crate::buffer::CircularTerminalBuffer;
use crate::error::Result;
use crate::model::SessionStatus;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Pacing delay `send_text` waits between writing text and the line
/// terminator, so the agent's TUI has time to absorb the text before submit.
pub const SEND_TEXT_PACING: std::time::Duration = std::time::Duration::from_millis(50);

pub type ExitCallback = Box<dyn Fn(Option<i32>) + Send + Sync>;
pub type StatusCallback = Box<dyn Fn(SessionStatus) + Send + Sync>;

/// Parameters needed to start any backend variant.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn start(&self, spec: StartSpec) -> Result<()>;

    /// Fire-and-forget write; a silent no-op after exit.
    fn write(&self, bytes: &[u8]);

    /// Write `text`, pace briefly, then the line terminator. Large inputs
    /// are spilled to a temp file by the caller (Session) before reaching
    /// the backend — see [`crate::session::Session::send_text`].
    async fn send_text(&self, text: &str) -> Result<()>;

    async fn send_enter(&self) -> Result<()>;

    fn resize(&self, cols: u16, rows: u16);

    async fn graceful_shutdown(&self, timeout: std::time::Duration);

    fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>>;

    fn is_running(&self) -> bool;

    fn status(&self) -> SessionStatus;

    fn process_id(&self) -> Option<u32>;

    fn set_on_process_exited(&self, callback: ExitCallback);

    fn set_on_status_changed(&self, callback: StatusCallback);

    /// Tell the backend which agent session id to resume on its next
    /// invocation, once one becomes known. A no-op for backends that don't
    /// re-invoke a process per prompt.
    fn set_resume_agent_session_id(&self, _id: Option<String>) {}
}
