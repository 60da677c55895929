//! Pseudo-console backend (C2): owns one PTY master/slave pair with a
//! resizable window, selected per platform at construction time.
//!
//! A Windows ConPTY variant and a Unix `openpty` variant share one contract,
//! built on the native PTY system `portable-pty` already exposes per
//! platform; this module adds the platform nuances (Unix `TERM`
//! inheritance) on top of that shared engine rather than re-implementing
//! raw PTY allocation. Targets with neither facility fall back to
//! [`HeadlessPseudoConsole`], a plain-pipe implementation of the same
//! contract.

#[cfg(not(any(unix, windows)))]
mod headless;
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(not(any(unix, windows)))]
pub use headless::HeadlessPseudoConsole;
pub use unix::UnixPseudoConsole;
#[cfg(windows)]
pub use windows::ConPtyPseudoConsole;

use crate::error::{DirectorError, Result};
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtyPair, PtySize};
use std::io::{Read, Write};
use std::sync::Mutex;

/// Marker env var the agent CLI uses to detect that it is already running
/// nested inside another instance of itself. `ProcessHost` strips it before
/// every spawn so a session launched from within `cc-director` does not
/// self-detect as nested.
pub const NESTED_INSTANCE_ENV_VAR: &str = "CLAUDE_CODE_NESTED_INSTANCE";

/// Uniform contract a pseudo-console backend exposes to [`crate::process_host::ProcessHost`].
#[async_trait]
pub trait PseudoConsole: Send + Sync {
    /// Spawn `cmd` attached to this pseudo-console. One-shot; implementations
    /// return [`DirectorError::AlreadyStarted`] on a second call.
    async fn spawn(&self, cmd: CommandBuilder) -> Result<Box<dyn Child + Send>>;

    /// Best-effort resize. Failures are logged by the caller, never propagated.
    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    /// Write to the PTY master (the agent's stdin).
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Read from the PTY master. Returns an empty vector on would-block, and
    /// `Ok(vec![])` with no further data available after EOF.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Current (cols, rows).
    fn size(&self) -> (u16, u16);

    /// Release both ends of the pair.
    fn dispose(&self);

    /// Default environment entries this variant's children should inherit
    /// (e.g. `TERM` on Unix). Empty for variants with no such requirement.
    fn default_child_env(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Shared engine wrapping `portable-pty`'s native pair, reused by both
/// platform variants.
pub(crate) struct NativeEngine {
    size: Mutex<PtySize>,
    pair: Mutex<Option<PtyPair>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl NativeEngine {
    pub(crate) fn create(cols: u16, rows: u16) -> Result<Self> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|e| DirectorError::PtyInitFailed(e.to_string()))?;

        Ok(Self {
            size: Mutex::new(size),
            pair: Mutex::new(Some(pair)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }

    pub(crate) fn spawn(&self, cmd: CommandBuilder) -> Result<Box<dyn Child + Send>> {
        let pair_guard = self.pair.lock().expect("pty mutex poisoned");
        let pair = pair_guard
            .as_ref()
            .ok_or(DirectorError::AlreadyStarted)?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DirectorError::ProcessSpawnFailed(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DirectorError::PtyInitFailed(e.to_string()))?;
        *self.reader.lock().expect("pty mutex poisoned") = Some(reader);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DirectorError::PtyInitFailed(e.to_string()))?;
        *self.writer.lock().expect("pty mutex poisoned") = Some(writer);

        Ok(child)
    }

    pub(crate) fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let new_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair_guard = self.pair.lock().expect("pty mutex poisoned");
        if let Some(pair) = pair_guard.as_ref() {
            pair.master
                .resize(new_size)
                .map_err(|e| DirectorError::PtyInitFailed(e.to_string()))?;
        }
        *self.size.lock().expect("pty mutex poisoned") = new_size;
        Ok(())
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().expect("pty mutex poisoned");
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(bytes)?;
                writer.flush()?;
                Ok(())
            }
            // Writing after dispose/before spawn is a silent no-op (§4.3).
            None => Ok(()),
        }
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.reader.lock().expect("pty mutex poisoned");
        match guard.as_mut() {
            Some(reader) => match reader.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e.into()),
            },
            None => Ok(0),
        }
    }

    pub(crate) fn size(&self) -> (u16, u16) {
        let s = self.size.lock().expect("pty mutex poisoned");
        (s.cols, s.rows)
    }

    pub(crate) fn dispose(&self) {
        self.reader.lock().expect("pty mutex poisoned").take();
        self.writer.lock().expect("pty mutex poisoned").take();
        self.pair.lock().expect("pty mutex poisoned").take();
    }
}

/// Construct the platform-appropriate pseudo-console. Targets with neither
/// `openpty` nor ConPTY fall back to [`HeadlessPseudoConsole`].
pub fn create_platform_pty(cols: u16, rows: u16) -> Result<Box<dyn PseudoConsole>> {
    #[cfg(windows)]
    {
        Ok(Box::new(ConPtyPseudoConsole::create(cols, rows)?))
    }
    #[cfg(unix)]
    {
        Ok(Box::new(UnixPseudoConsole::create(cols, rows)?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        Ok(Box::new(HeadlessPseudoConsole::create(cols, rows)?))
    }
}
