//! Unix domain socket transport.

use super::{parse_hook_event_line, HookEventCallback, IpcServer, ACCEPT_BACKOFF, UNIX_SOCKET_BACKLOG};
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct UnixSocketIpcServer {
    socket_path: PathBuf,
    on_event: HookEventCallback,
}

impl UnixSocketIpcServer {
    pub fn new(socket_path: PathBuf, on_event: HookEventCallback) -> Self {
        Self {
            socket_path,
            on_event,
        }
    }

    fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            debug!(path = %self.socket_path.display(), "removing stale socket file");
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        // UNIX_SOCKET_BACKLOG documents the backlog the spec calls for;
        // tokio's UnixListener::bind uses a fixed OS backlog internally, so
        // there is no handle to apply it to post-bind.
        let _ = UNIX_SOCKET_BACKLOG;
        Ok(listener)
    }
}

#[async_trait]
impl IpcServer for UnixSocketIpcServer {
    async fn serve(&self, cancellation: CancellationToken) -> Result<()> {
        let listener = self.bind()?;
        info!(path = %self.socket_path.display(), "ipc server listening");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let on_event = self.on_event.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, on_event).await;
                            });
                        }
                        Err(err) => {
                            warn!(%err, "ipc accept error, backing off");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, on_event: HookEventCallback) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => {}
        Ok(_) => {
            if let Some(event) = parse_hook_event_line(&line) {
                on_event(event);
            }
        }
        Err(err) => debug!(%err, "ipc connection read error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HookEvent;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn accepted_connection_delivers_one_hook_event() {
        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("director.sock");
        let received: Arc<Mutex<Vec<HookEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let server = UnixSocketIpcServer::new(
            socket_path.clone(),
            Arc::new(move |event| received_clone.lock().unwrap().push(event)),
        );
        let token = CancellationToken::new();
        let token_clone = token.clone();
        let handle = tokio::spawn(async move { server.serve(token_clone).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream
            .write_all(b"{\"hook_event_name\":\"Stop\"}\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        let _ = handle.await;

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(received.lock().unwrap()[0].hook_event_name, "Stop");
    }
}
