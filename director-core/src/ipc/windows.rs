//! Named-pipe transport (Windows).

use super::{parse_hook_event_line, HookEventCallback, IpcServer, ACCEPT_BACKOFF};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct NamedPipeIpcServer {
    pipe_name: String,
    on_event: HookEventCallback,
}

impl NamedPipeIpcServer {
    pub fn new(pipe_name: String, on_event: HookEventCallback) -> Self {
        Self { pipe_name, on_event }
    }

    fn pipe_path(&self) -> String {
        format!(r"\\.\pipe\{}", self.pipe_name)
    }

    fn new_instance(&self, first: bool) -> std::io::Result<NamedPipeServer> {
        ServerOptions::new()
            .first_pipe_instance(first)
            .in_buffer_size(4096)
            .out_buffer_size(4096)
            .create(self.pipe_path())
    }
}

#[async_trait]
impl IpcServer for NamedPipeIpcServer {
    async fn serve(&self, cancellation: CancellationToken) -> Result<()> {
        let mut server = self.new_instance(true)?;
        info!(pipe = %self.pipe_name, "ipc server listening");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                connected = server.connect() => {
                    match connected {
                        Ok(()) => {
                            let next_server = match self.new_instance(false) {
                                Ok(s) => s,
                                Err(err) => {
                                    warn!(%err, "failed creating next pipe instance, backing off");
                                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                                    continue;
                                }
                            };
                            let connected_server = std::mem::replace(&mut server, next_server);
                            let on_event = self.on_event.clone();
                            tokio::spawn(async move {
                                handle_connection(connected_server, on_event).await;
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

        Ok(())
    }
}

async fn handle_connection(server: NamedPipeServer, on_event: HookEventCallback) {
    let mut reader = tokio::io::BufReader::new(server);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => {}
        Ok(_) => {
            if let Some(event) = parse_hook_event_line(&line) {
                on_event(event);
            }
        }
        Err(err) => tracing::debug!(%err, "ipc connection read error"),
    }
}
