//! Pipe-based pseudo-console fallback for targets with no native PTY
//! support (`openpty` on Unix, ConPTY on Windows). Mirrors the teacher's
//! own headless terminal handle: piped stdin/stdout/stderr instead of a
//! real pseudo-console, with a background thread draining child output
//! into a shared buffer that `read()` copies out of.

use super::PseudoConsole;
use crate::error::{DirectorError, Result};
use async_trait::async_trait;
use portable_pty::{Child as PtyChild, CommandBuilder};
use std::io::{Read, Write};
use std::process::{Child as StdChild, Command as StdCommand, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// Adapts a plain `std::process::Child` to the `portable_pty::Child` contract
/// `ProcessHost` expects from every backend.
#[derive(Debug)]
struct HeadlessChild(StdChild);

impl PtyChild for HeadlessChild {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.0.try_wait()
    }

    fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.0.wait()
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill()
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.0.id())
    }
}

fn spawn_drain(mut reader: impl Read + Send + 'static, output: OutputBuffer) {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => output
                    .lock()
                    .expect("mutex poisoned")
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
}

pub struct HeadlessPseudoConsole {
    size: Mutex<(u16, u16)>,
    stdin: Mutex<Option<std::process::ChildStdin>>,
    output: OutputBuffer,
}

impl HeadlessPseudoConsole {
    pub fn create(cols: u16, rows: u16) -> Result<Self> {
        Ok(Self {
            size: Mutex::new((cols, rows)),
            stdin: Mutex::new(None),
            output: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl PseudoConsole for HeadlessPseudoConsole {
    async fn spawn(&self, cmd: CommandBuilder) -> Result<Box<dyn PtyChild + Send>> {
        let argv = cmd.get_argv();
        let program = argv
            .first()
            .ok_or_else(|| DirectorError::ProcessSpawnFailed("empty command".to_string()))?;

        let mut command = StdCommand::new(program);
        command.args(&argv[1..]);
        if let Some(cwd) = cmd.get_cwd() {
            command.current_dir(cwd);
        }
        for (key, value) in cmd.iter_extra_env_as_str() {
            command.env(key, value);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| DirectorError::ProcessSpawnFailed(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        spawn_drain(stdout, self.output.clone());
        spawn_drain(stderr, self.output.clone());
        *self.stdin.lock().expect("mutex poisoned") = stdin;

        Ok(Box::new(HeadlessChild(child)))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        *self.size.lock().expect("mutex poisoned") = (cols, rows);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().expect("mutex poisoned");
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(bytes)?;
                stdin.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut output = self.output.lock().expect("mutex poisoned");
        if output.is_empty() {
            return Ok(0);
        }
        let n = output.len().min(buf.len());
        buf[..n].copy_from_slice(&output[..n]);
        output.drain(..n);
        Ok(n)
    }

    fn size(&self) -> (u16, u16) {
        *self.size.lock().expect("mutex poisoned")
    }

    fn dispose(&self) {
        self.stdin.lock().expect("mutex poisoned").take();
    }
}
