#![forbid(unsafe_code)]

//! `analysis-supervisor`: per-workspace analysis server daemon.
//!
//! Loads configuration, reconciles the supervisor against the configured
//! workspaces, follows config-file edits, and serves the IPC socket for
//! `analysis-supervisor-ctl`.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncReadExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use analysis_supervisor::config_watcher::ConfigWatcher;
use analysis_supervisor::ipc::server::spawn_ipc_server;
use analysis_supervisor::models::workspace::Workspace;
use analysis_supervisor::server::transport::MessageChannel;
use analysis_supervisor::{AppError, Result, Supervisor, SupervisorConfig, SupervisorEvent};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "analysis-supervisor",
    about = "Per-workspace static-analysis server supervisor",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("analysis-supervisor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(ref path) => SupervisorConfig::load_from_path(path)?,
        None => SupervisorConfig::default(),
    };
    if !config.enable {
        info!("supervision disabled by configuration; exiting");
        return Ok(());
    }
    info!(workspaces = config.workspaces.len(), "configuration loaded");

    // ── Supervisor and event consumer ───────────────────
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(&config, event_tx);
    let consumer = tokio::spawn(consume_events(event_rx));

    supervisor.reconcile(&config.workspaces).await;

    // ── Config hot-reload ───────────────────────────────
    let (workspace_tx, mut workspace_rx) = mpsc::unbounded_channel::<Vec<Workspace>>();
    let _watcher = match args.config {
        Some(ref path) => match ConfigWatcher::new(path, workspace_tx) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, "config watcher unavailable; workspace edits need a restart");
                None
            }
        },
        None => None,
    };

    // ── IPC ─────────────────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = match spawn_ipc_server(&config.ipc_name, supervisor.clone(), ct.clone()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!(%err, "IPC server failed to start; continuing without it");
            None
        }
    };

    info!("analysis-supervisor ready");

    // ── Main loop ───────────────────────────────────────
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut hangup = hangup_listener();

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            Some(workspaces) = workspace_rx.recv() => {
                supervisor.reconcile(&workspaces).await;
            }
            () = next_hangup(&mut hangup) => {
                info!("hangup received; restarting all sessions");
                supervisor.restart_all().await;
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    ct.cancel();
    supervisor.shutdown().await;
    if let Some(handle) = ipc_handle {
        let _ = handle.await;
    }
    consumer.abort();
    info!("analysis-supervisor shut down");

    Ok(())
}

/// Live channels held by the daemon: the write half is kept open and the
/// read half is drained by a task.
type HeldChannels = HashMap<Workspace, (WriteHalf<MessageChannel>, JoinHandle<()>)>;

async fn consume_events(mut events: mpsc::UnboundedReceiver<SupervisorEvent>) {
    let mut held: HeldChannels = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            SupervisorEvent::Status(status) => {
                info!(
                    workspace = %status.workspace.name,
                    transient = status.is_transient(),
                    "{}",
                    status.message
                );
            }
            SupervisorEvent::Diagnostic { .. } => {}
            SupervisorEvent::ChannelReady { workspace, channel } => {
                let (mut reader, writer) = tokio::io::split(channel);
                let name = workspace.name.clone();
                let drain = tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    loop {
                        match reader.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => debug!(workspace = %name, bytes = n, "server message"),
                        }
                    }
                });
                if let Some((_, previous)) = held.insert(workspace, (writer, drain)) {
                    previous.abort();
                }
            }
        }
    }

    for (_, (_, drain)) in held {
        drain.abort();
    }
}

#[cfg(unix)]
type Hangup = Option<tokio::signal::unix::Signal>;

#[cfg(not(unix))]
type Hangup = ();

#[cfg(unix)]
fn hangup_listener() -> Hangup {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(err) => {
            warn!(%err, "failed to register SIGHUP handler; restart via IPC only");
            None
        }
    }
}

#[cfg(not(unix))]
fn hangup_listener() -> Hangup {}

#[cfg(unix)]
async fn next_hangup(hangup: &mut Hangup) {
    if let Some(signal) = hangup {
        if signal.recv().await.is_some() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(not(unix))]
async fn next_hangup(_hangup: &mut Hangup) {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
