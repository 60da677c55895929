//! Unix `openpty` pseudo-console variant.

use super::{NativeEngine, PseudoConsole};
use crate::error::Result;
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder};

/// Unix PTY pair. Resize goes through the OS's terminal-size ioctl, whose
/// request code differs between macOS and Linux; `portable-pty` resolves
/// that at compile time per target, so this wrapper only adds the
/// Unix-specific default environment (`TERM`) the spec calls for.
pub struct UnixPseudoConsole {
    engine: NativeEngine,
}

impl UnixPseudoConsole {
    pub fn create(cols: u16, rows: u16) -> Result<Self> {
        Ok(Self {
            engine: NativeEngine::create(cols, rows)?,
        })
    }
}

#[async_trait]
impl PseudoConsole for UnixPseudoConsole {
    async fn spawn(&self, cmd: CommandBuilder) -> Result<Box<dyn Child + Send>> {
        self.engine.spawn(cmd)
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.engine.resize(cols, rows)
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.engine.write(bytes)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.engine.read(buf)
    }

    fn size(&self) -> (u16, u16) {
        self.engine.size()
    }

    fn dispose(&self) {
        self.engine.dispose()
    }

    fn default_child_env(&self) -> Vec<(String, String)> {
        vec![("TERM".to_string(), "xterm-256color".to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_reports_requested_size() {
        let pty = UnixPseudoConsole::create(80, 24).expect("pty init should succeed in test env");
        assert_eq!(pty.size(), (80, 24));
    }

    #[test]
    fn default_env_sets_term() {
        let pty = UnixPseudoConsole::create(80, 24).unwrap();
        let env = pty.default_child_env();
        assert_eq!(env, vec![("TERM".to_string(), "xterm-256color".to_string())]);
    }
}
