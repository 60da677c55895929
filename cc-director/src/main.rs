//! Thin host binary for `director-core`: CLI parsing, configuration,
//! logging, and the glue an embedder (UI, chat bridge) would otherwise
//! provide directly.

use anyhow::Result;
use clap::{Parser, Subcommand};
use director_core::model::{AgentSessionId, BackendKind};
use director_core::persistence::{SessionHistoryStore, SessionStateStore};
use director_core::router::EventRouter;
use director_core::{DirectorConfig, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cc-director")]
#[command(about = "Supervises concurrent pseudo-terminal-attached agent sessions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hook-event IPC server in the foreground until interrupted.
    Serve,
    /// Start a new supervised session attached to a repository, in the
    /// foreground, relaying stdin/stdout until it exits.
    Create {
        /// Repository directory the session's agent process runs in.
        repo: PathBuf,
        /// Agent executable to launch.
        #[arg(long, default_value = "claude")]
        exe: String,
        /// Backend transport.
        #[arg(long, value_enum, default_value = "unix-pty")]
        backend: CliBackendKind,
        /// Resume a known agent session id.
        #[arg(long)]
        resume: Option<String>,
    },
    /// List sessions recorded in the persisted state file.
    List,
    /// Send SIGTERM to a persisted session's recorded process id.
    Kill {
        /// Session id as printed by `list`.
        session_id: String,
    },
    /// Print the linked transcript's recorded prompts for a session.
    Tail {
        /// Session id as printed by `list`.
        session_id: String,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum CliBackendKind {
    UnixPty,
    ConPty,
    Pipe,
}

impl From<CliBackendKind> for BackendKind {
    fn from(value: CliBackendKind) -> Self {
        match value {
            CliBackendKind::UnixPty => BackendKind::UnixPty,
            CliBackendKind::ConPty => BackendKind::ConPty,
            CliBackendKind::Pipe => BackendKind::Pipe,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cc_director=info,director_core=info")))
        .init();

    let cli = Cli::parse();
    let config = DirectorConfig::default();

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Create {
            repo,
            exe,
            backend,
            resume,
        } => create(config, repo, exe, backend.into(), resume).await,
        Command::List => list(config),
        Command::Kill { session_id } => kill(config, &session_id),
        Command::Tail { session_id } => tail(config, &session_id),
    }
}

async fn serve(config: DirectorConfig) -> Result<()> {
    let manager = Arc::new(SessionManager::new(config.clone()));
    manager.scan_for_orphans(&default_agent_image_name());

    let router = Arc::new(EventRouter::new(manager.clone()));
    let on_event = {
        let router = router.clone();
        Arc::new(move |event| router.route(event))
    };
    let server = director_core::ipc::create_ipc_server(config.ipc_endpoint.clone(), on_event);

    let cancellation = tokio_util::sync::CancellationToken::new();
    let serve_token = cancellation.clone();
    let serve_handle = tokio::spawn(async move { server.serve(serve_token).await });

    tracing::info!(endpoint = %config.ipc_endpoint, "cc-director serving hook events");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    cancellation.cancel();
    let _ = serve_handle.await;
    manager.dispose().await;
    Ok(())
}

async fn create(
    config: DirectorConfig,
    repo: PathBuf,
    exe: String,
    backend: BackendKind,
    resume: Option<String>,
) -> Result<()> {
    let manager = SessionManager::new(config.clone());
    let session = manager
        .create_session(&repo, exe, vec![], backend, resume.map(AgentSessionId))
        .await?;

    println!("started session {}", session.id());

    let buffer = session.buffer();
    let mut last_len = 0usize;
    loop {
        if session.status().is_terminal() {
            break;
        }
        if let Some(buffer) = &buffer {
            let snapshot = buffer.snapshot();
            if snapshot.len() > last_len {
                print!("{}", String::from_utf8_lossy(&snapshot[last_len..]));
                use std::io::Write;
                std::io::stdout().flush().ok();
                last_len = snapshot.len();
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            _ = tokio::signal::ctrl_c() => {
                session.kill(config.graceful_shutdown_timeout).await;
                break;
            }
        }
    }

    let store = SessionStateStore::new(config.sessions_state_path(), config.sessions_state_backup_path());
    manager.save_current_state(&store)?;

    Ok(())
}

fn list(config: DirectorConfig) -> Result<()> {
    let store = SessionStateStore::new(config.sessions_state_path(), config.sessions_state_backup_path());
    let load = store.load();
    if load.file_existed_but_failed {
        eprintln!("warning: {}", load.diagnostic.unwrap_or_default());
    }
    for persisted in load.sessions {
        println!(
            "{}  {:?}  {}  agent={}  pid={}",
            persisted.id,
            persisted.backend_kind,
            persisted.repo_path.display(),
            persisted
                .agent_session_id
                .map(|id| id.0)
                .unwrap_or_else(|| "-".to_string()),
            persisted.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn kill(config: DirectorConfig, session_id: &str) -> Result<()> {
    let store = SessionStateStore::new(config.sessions_state_path(), config.sessions_state_backup_path());
    let load = store.load();
    let Some(persisted) = load.sessions.into_iter().find(|p| p.id.to_string() == session_id) else {
        anyhow::bail!("no persisted session with id {session_id}");
    };
    let Some(pid) = persisted.pid else {
        anyhow::bail!("session {session_id} has no recorded process id");
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill as send_signal, Signal};
        use nix::unistd::Pid;
        send_signal(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    }
    #[cfg(not(unix))]
    {
        anyhow::bail!("killing by pid is only implemented on unix in this build");
    }

    #[allow(unreachable_code)]
    Ok(())
}

fn tail(config: DirectorConfig, session_id: &str) -> Result<()> {
    let store = SessionStateStore::new(config.sessions_state_path(), config.sessions_state_backup_path());
    let load = store.load();
    let persisted = load
        .sessions
        .into_iter()
        .find(|p| p.id.to_string() == session_id)
        .ok_or_else(|| anyhow::anyhow!("no persisted session with id {session_id}"))?;

    let Some(agent_session_id) = persisted.agent_session_id else {
        anyhow::bail!("session {session_id} has no linked agent session id");
    };

    let history = SessionHistoryStore::new(config.history_dir());
    if let Some(entry) = history.find_by_agent_session_id(&agent_session_id) {
        if let Some(snippet) = entry.first_prompt_snippet {
            println!("{snippet}");
            return Ok(());
        }
    }

    let dir = director_core::transcript::project_transcript_dir(&config.transcripts_root, &persisted.repo_path);
    let jsonl_path = dir.join(format!("{}.jsonl", agent_session_id.0));
    for prompt in director_core::transcript::extract_user_prompts(&jsonl_path)? {
        println!("> {prompt}");
    }
    Ok(())
}

fn default_agent_image_name() -> String {
    "claude".to_string()
}
