//! Supervisor core for multiple concurrent pseudo-terminal-attached agent
//! processes.
//!
//! This crate owns the session model, the pseudo-console/process backends,
//! transcript-based identity verification, durable state, and the hook-event
//! IPC surface. It never resolves its own configuration or initializes
//! logging — both are the host application's job (`cc-director`, or any
//! other embedder).
//!
//! # Quick start
//!
//! ```no_run
//! use director_core::{DirectorConfig, SessionManager};
//! use director_core::model::BackendKind;
//! use std::path::Path;
//!
//! # async fn run() -> director_core::error::Result<()> {
//! let manager = SessionManager::new(DirectorConfig::default());
//! let session = manager
//!     .create_session(
//!         Path::new("."),
//!         "claude".to_string(),
//!         vec![],
//!         BackendKind::UnixPty,
//!         None,
//!     )
//!     .await?;
//! session.send_text("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod ipc;
pub mod manager;
pub mod model;
pub mod persistence;
pub mod process_host;
pub mod pty;
pub mod router;
pub mod session;
pub mod transcript;

pub use buffer::CircularTerminalBuffer;
pub use config::{ConfigProvider, DirectorConfig, StaticConfigProvider};
pub use error::{DirectorError, Result};
pub use manager::SessionManager;
pub use model::{AgentSessionId, BackendKind, HookEvent, SessionId, SessionStatus};
pub use router::EventRouter;
pub use session::{Session, SessionSnapshot};
