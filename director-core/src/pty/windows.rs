//! Windows ConPTY pseudo-console variant.

use super::{NativeEngine, PseudoConsole};
use crate::error::Result;
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder};

/// Windows pseudo-console pair, backed by the OS's `CreatePseudoConsole`
/// mechanism through `portable-pty`'s native implementation. The extended
/// startup-info attachment and `inherit_handles = false` behavior the spec
/// describes are handled internally by `portable-pty` when spawning against
/// this pair.
pub struct ConPtyPseudoConsole {
    engine: NativeEngine,
}

impl ConPtyPseudoConsole {
    pub fn create(cols: u16, rows: u16) -> Result<Self> {
        Ok(Self {
            engine: NativeEngine::create(cols, rows)?,
        })
    }
}

#[async_trait]
impl PseudoConsole for ConPtyPseudoConsole {
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
}
