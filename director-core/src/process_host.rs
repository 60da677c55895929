//! Process host (C3): spawns the agent attached to a [`PseudoConsole`] and
//! runs the drain + exit-monitor tasks that feed a session's buffer and
//! lifecycle state.

use crate::buffer::CircularTerminalBuffer;
use crate::error::{DirectorError, Result};
use crate::pty::{PseudoConsole, NESTED_INSTANCE_ENV_VAR};
use portable_pty::{Child, CommandBuilder};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ExitCallback = Box<dyn Fn(Option<i32>) + Send + Sync>;

/// Owns the pseudo-console and the spawned agent process for one backend
/// instance. Exclusively owned by the `SessionBackend` that created it.
pub struct ProcessHost {
    pty: Arc<dyn PseudoConsole>,
    child: Arc<Mutex<Option<Box<dyn Child + Send>>>>,
    started: AtomicBool,
    cancellation: CancellationToken,
    exit_fired: Arc<AtomicBool>,
    on_exit: Mutex<Option<ExitCallback>>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
    exit_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessHost {
    pub fn new(pty: Arc<dyn PseudoConsole>) -> Self {
        Self {
            pty,
            child: Arc::new(Mutex::new(None)),
            started: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
            exit_fired: Arc::new(AtomicBool::new(false)),
            on_exit: Mutex::new(None),
            drain_handle: Mutex::new(None),
            exit_handle: Mutex::new(None),
        }
    }

    /// Register the callback invoked exactly once when the process exits.
    pub fn set_on_exited(&self, callback: impl Fn(Option<i32>) + Send + Sync + 'static) {
        *self.on_exit.lock().expect("mutex poisoned") = Some(Box::new(callback));
    }

    /// One-shot spawn of the agent process attached to the pseudo-console.
    pub async fn start(
        &self,
        exe: &str,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DirectorError::AlreadyStarted);
        }

        let mut cmd = CommandBuilder::new(exe);
        for arg in args {
            cmd.arg(arg);
        }
        cmd.cwd(cwd);
        cmd.env_remove(NESTED_INSTANCE_ENV_VAR);
        for (key, value) in self.pty.default_child_env().iter().chain(env.iter()) {
            cmd.env(key, value);
        }

        let child = self.pty.spawn(cmd).await.inspect_err(|_| {
            self.started.store(false, Ordering::SeqCst);
        })?;

        *self.child.lock().expect("mutex poisoned") = Some(child);
        info!(exe, "process host spawned agent process");
        Ok(())
    }

    /// Start the drain loop: reads from the PTY master and appends into
    /// `buffer` until EOF. IO errors and disposed-stream errors are
    /// swallowed (expected during shutdown).
    pub fn start_drain_loop(&self, buffer: Arc<CircularTerminalBuffer>) {
        let pty = self.pty.clone();
        let token = self.cancellation.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut chunk = [0u8; 4096];
            loop {
                if token.is_cancelled() {
                    break;
                }
                match pty.read(&mut chunk) {
                    Ok(0) => {
                        // Either EOF or no data currently available; a real
                        // EOF is only distinguishable by the process having
                        // exited, which the exit-monitor task observes.
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        continue;
                    }
                    Ok(n) => buffer.write(&chunk[..n]),
                    Err(err) => {
                        debug!(%err, "drain loop read error, ending loop");
                        break;
                    }
                }
            }
        });
        *self.drain_handle.lock().expect("mutex poisoned") = Some(handle);
    }

    /// Start the exit monitor: waits for process exit and fires `OnExited`
    /// exactly once.
    pub fn start_exit_monitor(&self) {
        let child = self.child.clone();
        let exit_fired = self.exit_fired.clone();
        let token = self.cancellation.clone();
        let on_exit = {
            // Can't clone a trait object directly; move the slot and let the
            // monitor task own it for the single invocation it needs.
            let mut guard = self.on_exit.lock().expect("mutex poisoned");
            guard.take()
        };

        let handle = tokio::task::spawn_blocking(move || {
            let exit_code = loop {
                if token.is_cancelled() {
                    return;
                }
                let mut guard = child.lock().expect("mutex poisoned");
                let Some(child) = guard.as_mut() else {
                    return;
                };
                match child.try_wait() {
                    Ok(Some(status)) => break status.exit_code() as i32,
                    Ok(None) => {
                        drop(guard);
                        std::thread::sleep(std::time::Duration::from_millis(50));
                        continue;
                    }
                    Err(err) => {
                        warn!(%err, "exit monitor wait error");
                        return;
                    }
                }
            };

            if !exit_fired.swap(true, Ordering::SeqCst) {
                info!(exit_code, "agent process exited");
                if let Some(callback) = on_exit {
                    callback(Some(exit_code));
                }
            }
        });
        *self.exit_handle.lock().expect("mutex poisoned") = Some(handle);
    }

    /// Forward bytes to the master stream; a silent no-op if disposed.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.pty.write(bytes)
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        if let Err(err) = self.pty.resize(cols, rows) {
            warn!(%err, "pty resize failed");
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child
            .lock()
            .expect("mutex poisoned")
            .as_ref()
            .and_then(|c| c.process_id())
    }

    pub fn is_running(&self) -> bool {
        let mut guard = self.child.lock().expect("mutex poisoned");
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Write the interrupt byte and, on Unix, send SIGTERM; wait up to
    /// `timeout` for exit; force-terminate the tree if still alive.
    pub async fn graceful_shutdown(&self, timeout: std::time::Duration) -> Result<()> {
        let _ = self.pty.write(&[0x03]);

        #[cfg(unix)]
        if let Some(pid) = self.process_id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.is_running() {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        if self.is_running() {
            warn!("graceful shutdown timed out, force-terminating process tree");
            let mut guard = self.child.lock().expect("mutex poisoned");
            if let Some(child) = guard.as_mut() {
                let _ = child.kill();
            }
        }
        Ok(())
    }

    /// Cancel the drain/exit tasks (bounded wait), terminate the process if
    /// still alive, then dispose the pseudo-console.
    pub async fn dispose(&self) {
        self.cancellation.cancel();

        let drain = self.drain_handle.lock().expect("mutex poisoned").take();
        let exit = self.exit_handle.lock().expect("mutex poisoned").take();
        let bounded_wait = std::time::Duration::from_secs(3);
        for handle in [drain, exit].into_iter().flatten() {
            let _ = tokio::time::timeout(bounded_wait, handle).await;
        }

        if self.is_running() {
            let mut guard = self.child.lock().expect("mutex poisoned");
            if let Some(child) = guard.as_mut() {
                let _ = child.kill();
            }
        }

        self.pty.dispose();
    }
}
