//! Pipe backend: a fresh short-lived agent process per prompt, run in print
//! mode (`-p`) rather than attached to a PTY. A semaphore of capacity one
//! keeps invocations from overlapping; a resume id supplied by the caller
//! (once a prior agent session is known) is threaded into the next
//! invocation's `--resume` flag, then cleared once that invocation exits so
//! the following prompt starts fresh unless the caller rebinds a new id.

use super::{ExitCallback, SessionBackend, StartSpec, StatusCallback};
use crate::buffer::CircularTerminalBuffer;
use crate::error::{DirectorError, Result};
use crate::model::SessionStatus;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct PipeBackend {
    spec: Mutex<Option<StartSpec>>,
    buffer: Arc<CircularTerminalBuffer>,
    status: RwLock<SessionStatus>,
    invocation_lock: Arc<Semaphore>,
    resume_id: Mutex<Option<String>>,
    current_pid: AtomicU32,
    disposed: AtomicBool,
    exit_cb: Mutex<Option<ExitCallback>>,
    status_cb: Mutex<Option<StatusCallback>>,
}

impl PipeBackend {
    pub fn new() -> Self {
        Self {
            spec: Mutex::new(None),
            buffer: Arc::new(CircularTerminalBuffer::default()),
            status: RwLock::new(SessionStatus::Starting),
            invocation_lock: Arc::new(Semaphore::new(1)),
            resume_id: Mutex::new(None),
            current_pid: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            exit_cb: Mutex::new(None),
            status_cb: Mutex::new(None),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().expect("status lock poisoned") = status;
        if let Some(cb) = self.status_cb.lock().expect("mutex poisoned").as_ref() {
            cb(status);
        }
    }
}

impl Default for PipeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for PipeBackend {
    async fn start(&self, spec: StartSpec) -> Result<()> {
        *self.spec.lock().expect("mutex poisoned") = Some(spec);
        self.set_status(SessionStatus::Running);
        Ok(())
    }

    fn write(&self, _bytes: &[u8]) {
        debug!("pipe backend ignores raw writes outside of send_text");
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let spec = self
            .spec
            .lock()
            .expect("mutex poisoned")
            .clone()
            .ok_or(DirectorError::AlreadyStarted)?;

        let _permit = self
            .invocation_lock
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DirectorError::Other(e.into()))?;

        self.buffer.write(format!("> {text}\n\n").as_bytes());

        let mut cmd = Command::new(&spec.exe);
        cmd.arg("-p").arg(text);
        if let Some(id) = self.resume_id.lock().expect("mutex poisoned").clone() {
            cmd.arg("--resume").arg(id);
        }
        cmd.args(&spec.args);
        cmd.current_dir(&spec.cwd);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| DirectorError::ProcessSpawnFailed(e.to_string()))?;
        self.current_pid.store(child.id().unwrap_or(0), Ordering::SeqCst);

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let buffer = self.buffer.clone();

        let stdout_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => buffer.write(line.as_bytes()),
                    Err(err) => {
                        debug!(%err, "pipe backend stdout read error");
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => warn!(line = line.trim_end(), "agent process stderr"),
                    Err(err) => {
                        debug!(%err, "pipe backend stderr read error");
                        break;
                    }
                }
            }
        });

        let exit_status = child.wait().await;
        let _ = tokio::join!(stdout_task, stderr_task);
        self.current_pid.store(0, Ordering::SeqCst);
        self.resume_id.lock().expect("mutex poisoned").take();

        let exit_code = match &exit_status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(%err, "pipe backend failed to wait on agent process");
                None
            }
        };
        info!(?exit_code, "pipe backend invocation completed");

        if let Some(cb) = self.exit_cb.lock().expect("mutex poisoned").as_ref() {
            cb(exit_code);
        }

        Ok(())
    }

    async fn send_enter(&self) -> Result<()> {
        Ok(())
    }

    fn resize(&self, _cols: u16, _rows: u16) {}

    async fn graceful_shutdown(&self, _timeout: std::time::Duration) {
        self.disposed.store(true, Ordering::SeqCst);
        self.set_status(SessionStatus::Exited);
    }

    fn buffer(&self) -> Option<Arc<CircularTerminalBuffer>> {
        Some(self.buffer.clone())
    }

    fn is_running(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }

    fn status(&self) -> SessionStatus {
        *self.status.read().expect("status lock poisoned")
    }

    fn process_id(&self) -> Option<u32> {
        match self.current_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn set_on_process_exited(&self, callback: ExitCallback) {
        *self.exit_cb.lock().expect("mutex poisoned") = Some(callback);
    }

    fn set_on_status_changed(&self, callback: StatusCallback) {
        *self.status_cb.lock().expect("mutex poisoned") = Some(callback);
    }

    fn set_resume_agent_session_id(&self, id: Option<String>) {
        *self.resume_id.lock().expect("mutex poisoned") = id;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_sleep_script(dir: &std::path::Path, seconds: &str) -> std::path::PathBuf {
        let path = dir.join("pipe_backend_test_sleep.sh");
        std::fs::write(&path, format!("#!/bin/sh\nsleep {seconds}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn send_text_clears_resume_id_after_the_invocation_exits() {
        let backend = PipeBackend::new();
        backend
            .start(StartSpec {
                exe: "true".to_string(),
                args: vec![],
                cwd: std::env::temp_dir(),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();
        backend.set_resume_agent_session_id(Some("resume-1".to_string()));

        backend.send_text("hello").await.unwrap();

        assert!(backend.resume_id.lock().expect("mutex poisoned").is_none());
    }

    #[tokio::test]
    async fn send_text_serializes_overlapping_invocations() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_sleep_script(tmp.path(), "0.2");

        let backend = Arc::new(PipeBackend::new());
        backend
            .start(StartSpec {
                exe: script.to_string_lossy().to_string(),
                args: vec![],
                cwd: tmp.path().to_path_buf(),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        let a = backend.clone();
        let b = backend.clone();
        let start = std::time::Instant::now();
        let (first, second) = tokio::join!(a.send_text("first"), b.send_text("second"));
        first.unwrap();
        second.unwrap();

        assert!(start.elapsed() >= std::time::Duration::from_millis(350));
    }
}
