//! Hook-event IPC (C9): a platform-specific transport with an identical
//! contract — one UTF-8 newline-terminated JSON line per connection,
//! deserialized into a [`HookEvent`] and handed to a callback.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixSocketIpcServer;
#[cfg(windows)]
pub use windows::NamedPipeIpcServer;

use crate::error::Result;
use crate::model::HookEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Backlog depth for the Unix domain socket listener (§6.3).
pub const UNIX_SOCKET_BACKLOG: u32 = 10;

/// Backoff applied after a transient accept error before retrying.
pub const ACCEPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

pub type HookEventCallback = Arc<dyn Fn(HookEvent) + Send + Sync>;

#[async_trait]
pub trait IpcServer: Send + Sync {
    /// Runs the accept loop until `cancellation` fires. Shutdown closes the
    /// listener and, on Unix, removes the socket file.
    async fn serve(&self, cancellation: CancellationToken) -> Result<()>;
}

/// Chooses the platform transport. `endpoint` is a socket path on Unix, a
/// named-pipe name on Windows (see [`crate::config::DirectorConfig::ipc_endpoint`]).
pub fn create_ipc_server(endpoint: String, on_event: HookEventCallback) -> Box<dyn IpcServer> {
    #[cfg(unix)]
    {
        Box::new(UnixSocketIpcServer::new(endpoint.into(), on_event))
    }
    #[cfg(windows)]
    {
        Box::new(NamedPipeIpcServer::new(endpoint, on_event))
    }
}

/// Parses one accepted connection's single JSON line into a `HookEvent`,
/// stamping `received_at`. Malformed or empty lines yield `None`.
pub(crate) fn parse_hook_event_line(line: &str) -> Option<HookEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<HookEvent>(trimmed) {
        Ok(mut event) => {
            event.received_at = Some(chrono::Utc::now());
            Some(event)
        }
        Err(err) => {
            tracing::debug!(%err, "dropping malformed hook event line");
            None
        }
    }
}
