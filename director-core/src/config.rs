//! Configuration surface.
//!
//! `director-core` never resolves configuration on its own; it is handed a
//! [`DirectorConfig`] that implements [`ConfigProvider`]. Configuration
//! loading and storage-path resolution live outside the core (per the
//! non-goals in the specification) — this module only defines the shape of
//! that contract and a default/test implementation.

use std::path::PathBuf;
use std::time::Duration;

/// Minimum length, in bytes, a transcript's first user prompt must reach
/// before it is eligible for identity verification.
pub const MIN_VERIFICATION_LENGTH: usize = 50;

/// Fraction of a transcript's prompts that must be found in the terminal
/// buffer before a candidate session is considered matched.
pub const TERMINAL_MATCH_RATIO: f64 = 0.95;

/// Line count below which a terminal-verification attempt is a "probe run"
/// rather than a "confirmation run" (see §4.6b).
pub const PROBE_RUN_LINE_THRESHOLD: usize = 50;

/// Resolved runtime configuration for one supervisor instance.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Root directory under which session state and history are persisted.
    pub app_data_root: PathBuf,
    /// Root directory under which the agent keeps its per-project transcript
    /// directories (§6.2). Read-only as far as this crate is concerned.
    pub transcripts_root: PathBuf,
    /// Platform IPC endpoint: a named-pipe name on Windows, a socket path on Unix.
    pub ipc_endpoint: String,
    /// Initial PTY window size (cols, rows) for newly created sessions.
    pub initial_pty_size: (u16, u16),
    /// Budget for graceful shutdown before the process tree is force-killed.
    pub graceful_shutdown_timeout: Duration,
    /// Minimum first-prompt length required for file verification to succeed.
    pub min_verification_length: usize,
    /// Prompt-containment ratio required to bind terminal bytes to a transcript.
    pub terminal_match_ratio: f64,
    /// Payload size above which `send_text` spills to a temp file (§6.5).
    pub large_input_threshold: usize,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            app_data_root: default_app_data_root(),
            transcripts_root: default_transcripts_root(),
            ipc_endpoint: default_ipc_endpoint(),
            initial_pty_size: (120, 30),
            graceful_shutdown_timeout: Duration::from_millis(5000),
            min_verification_length: MIN_VERIFICATION_LENGTH,
            terminal_match_ratio: TERMINAL_MATCH_RATIO,
            large_input_threshold: 4096,
        }
    }
}

impl DirectorConfig {
    pub fn sessions_state_path(&self) -> PathBuf {
        self.app_data_root.join("sessions.json")
    }

    pub fn sessions_state_backup_path(&self) -> PathBuf {
        self.app_data_root.join("sessions.json.bak")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.app_data_root.join("sessions")
    }
}

#[cfg(windows)]
fn default_ipc_endpoint() -> String {
    "CC_ClaudeDirector".to_string()
}

#[cfg(not(windows))]
fn default_ipc_endpoint() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cc_director")
        .join("director.sock")
        .to_string_lossy()
        .into_owned()
}

fn default_app_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("CcDirector")
}

fn default_transcripts_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

/// Supplies the configuration the core runs with. Implemented by the host
/// application (`cc-director`, or any other embedder); the core treats it
/// as an external collaborator and never constructs one itself.
pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> DirectorConfig;
}

/// A `ConfigProvider` that always returns a fixed, pre-resolved config.
/// Used by tests and by the `cc-director` binary once it has finished
/// merging CLI flags, env vars, and on-disk config into one value.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider(pub DirectorConfig);

impl ConfigProvider for StaticConfigProvider {
    fn config(&self) -> DirectorConfig {
        self.0.clone()
    }
}

impl Default for StaticConfigProvider {
    fn default() -> Self {
        Self(DirectorConfig::default())
    }
}
