//! PTY-attached backend: a persistent agent process, used by both the
//! ConPTY (Windows) and Unix-PTY variants. The two variants differ only in
//! which [`PseudoConsole`] they wrap and in their line terminator; both are
//! represented by this one generic `PtyBackend` plus a pair of constructor
//! functions, since Rust's trait-object dispatch makes two structurally
//! identical wrapper types unnecessary (see `DESIGN.md`).

use super::{ExitCallback, SessionBackend, StartSpec, StatusCallback, SEND_TEXT_PACING};
use crate::buffer::CircularTerminalBuffer;
use crate::error::Result;
use crate::model::SessionStatus;
use crate::process_host::ProcessHost;
use crate::pty::{create_platform_pty, PseudoConsole};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Line terminator a PTY backend sends after `send_text`'s pacing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    Lf,
    CrLf,
    Cr,
}

impl LineTerminator {
    fn bytes(self) -> &'static [u8] {
        match self {
            LineTerminator::Lf => b"\n",
            LineTerminator::CrLf => b"\r\n",
            LineTerminator::Cr => b"\r",
        }
    }
}

pub struct PtyBackend {
    host: Arc<ProcessHost>,
    buffer: Arc<CircularTerminalBuffer>,
    status: Arc<RwLock<SessionStatus>>,
    line_terminator: LineTerminator,
    started: AtomicBool,
    status_cb: Arc<Mutex<Option<StatusCallback>>>,
}

impl PtyBackend {
    fn new(line_terminator: LineTerminator) -> Result<Self> {
        Ok(Self {
            host: Arc::new(ProcessHost::new(Arc::<dyn PseudoConsole>::from(
                create_platform_pty(120, 30)?,
            ))),
            buffer: Arc::new(CircularTerminalBuffer::default()),
            status: Arc::new(RwLock::new(SessionStatus::Starting)),
            line_terminator,
            started: AtomicBool::new(false),
            status_cb: Arc::new(Mutex::new(None)),
        })
    }

    /// The Unix `openpty` variant: `\n` line terminator, `TERM` inherited.
    pub fn new_unix_pty() -> Result<Self> {
        Self::new(LineTerminator::Lf)
    }

    /// The Windows ConPTY variant: `\r\n` line terminator.
    pub fn new_conpty() -> Result<Self> {
        Self::new(LineTerminator::CrLf)
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().expect("status lock poisoned") = status;
        if let Some(cb) = self.status_cb.lock().expect("mutex poisoned").as_ref() {
            cb(status);
        }
    }
}

#[async_trait]
impl SessionBackend for PtyBackend {
    async fn start(&self, spec: StartSpec) -> Result<()> {
        self.host
            .start(&spec.exe, &spec.args, &spec.cwd, &[])
            .await?;
        self.host.resize(spec.cols, spec.rows);
        self.started.store(true, Ordering::SeqCst);
        self.host.start_drain_loop(self.buffer.clone());

        let status = self.status.clone();
        let status_cb = self.status_cb.clone();
        self.host.set_on_exited(move |exit_code| {
            let new_status = if exit_code == Some(0) {
                SessionStatus::Exited
            } else {
                SessionStatus::Failed
            };
            *status.write().expect("status lock poisoned") = new_status;
            if let Some(cb) = status_cb.lock().expect("mutex poisoned").as_ref() {
                cb(new_status);
            }
        });
        self.host.start_exit_monitor();

        self.set_status(SessionStatus::Running);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) {
        if !self.started.load(Ordering::SeqCst) || self.status().is_terminal() {
            return;
        }
        let _ = self.host.write(bytes);
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.status().is_terminal() {
            return Ok(());
        }
        self.host.write(text.as_bytes())?;
        tokio::time::sleep(SEND_TEXT_PACING).await;
        self.host.write(self.line_terminator.bytes())?;
        Ok(())
    }

    async fn send_enter(&self) -> Result<()> {
        self.host.write(self.line_terminator.bytes())
    }

    fn resize(&self, cols: u16, rows: u16) {
        self.host.resize(cols, rows);
    }

    async fn graceful_shutdown(&self, timeout: std::time::Duration) {
        self.set_status(SessionStatus::Exiting);
        let _ = self.host.graceful_shutdown(timeout).await;
        self.host.dispose().await;
    }

    fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>> {
        Some(self.buffer.clone())
    }

    fn is_running(&self) -> bool {
        self.host.is_running()
    }

    fn status(&self) -> SessionStatus {
        *self.status.read().expect("status lock poisoned")
    }

    fn process_id(&self) -> Option<u32> {
        self.host.process_id()
    }

    fn set_on_process_exited(&self, callback: ExitCallback) {
        let inner = self.host.clone();
        inner.set_on_exited(move |code| callback(code));
    }

    fn set_on_status_changed(&self, callback: StatusCallback) {
        *self.status_cb.lock().expect("mutex poisoned") = Some(callback);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn graceful_shutdown_terminates_a_real_child_within_budget() {
        let backend = PtyBackend::new_unix_pty().unwrap();
        backend
            .start(StartSpec {
                exe: "sleep".to_string(),
                args: vec!["30".to_string()],
                cwd: std::env::temp_dir(),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        assert!(backend.is_running());
        backend
            .graceful_shutdown(std::time::Duration::from_secs(3))
            .await;
        assert!(!backend.is_running());
    }
}
