//! Per-workspace server supervision.
//!
//! The [`Supervisor`] owns a registry of at most one [`Session`] per
//! workspace. Each start attempt runs as one task: probe the tool version,
//! launch server mode, read the handshake, connect, then bridge the
//! connection to a [`MessageChannel`] handed to the host through
//! [`SupervisorEvent::ChannelReady`].
//!
//! Every registry write made by a session task is gated on the attempt id it
//! was started with, so a stopped or superseded attempt can never touch a
//! newer entry.

pub mod reconcile;
pub mod session;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SupervisorConfig, TimeoutConfig, ToolConfig};
use crate::launcher::process::Launcher;
use crate::launcher::resolver::resolve;
use crate::models::status::StatusUpdate;
use crate::models::version::ToolVersion;
use crate::models::workspace::Workspace;
use crate::server::handshake::start_handshake;
use crate::server::probe::probe_version;
use crate::server::transport::{channel_pair, ChannelClosed, Connection, MessageChannel};
use crate::{AppError, Result};

use self::reconcile::ReconcilePlan;
use self::session::{ChannelInfo, Launch, Session, SessionSummary};

/// Notifications from the supervisor to its host.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// A status string for one workspace.
    Status(StatusUpdate),
    /// One stderr line from a workspace's server.
    Diagnostic {
        /// Workspace whose server printed the line.
        workspace: Workspace,
        /// The line, without its terminator.
        line: String,
    },
    /// A session's channel is live. Dropping `channel` ends the session.
    ChannelReady {
        /// Workspace the channel serves.
        workspace: Workspace,
        /// Host end of the bridged connection.
        channel: MessageChannel,
    },
}

/// Status text for a failed start attempt.
///
/// A version below the minimum names the required version; any other probe
/// rejection points at the setup hint.
#[must_use]
pub fn failure_status(tool: &ToolConfig, err: &AppError) -> String {
    match err {
        AppError::VersionTooOld(msg) => format!("{} is outdated; {msg}", tool.display_name),
        err if err.is_probe_rejection() => {
            format!("{} is not configured; {}", tool.display_name, tool.setup_hint)
        }
        err => format!("Failed to start {}: {err}", tool.display_name),
    }
}

/// Status text once the probe accepted the tool.
#[must_use]
pub fn starting_status(tool: &ToolConfig, version: &ToolVersion) -> String {
    format!("Starting {} ({} {version})...", tool.display_name, tool.name)
}

#[derive(Debug)]
struct Inner {
    tool: ToolConfig,
    server_path: Option<String>,
    timeouts: TimeoutConfig,
    launcher: Launcher,
    registry: Mutex<HashMap<Workspace, Session>>,
    desired: Mutex<Vec<Workspace>>,
    reconciling: Mutex<()>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

/// Keeps one analysis server per workspace, converging on a desired set.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Build a supervisor whose launcher follows `config.login_shell`.
    #[must_use]
    pub fn new(config: &SupervisorConfig, events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        Self::with_launcher(config, Launcher::for_config(config.login_shell), events)
    }

    /// Build a supervisor with an explicit launcher.
    #[must_use]
    pub fn with_launcher(
        config: &SupervisorConfig,
        launcher: Launcher,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tool: config.tool.clone(),
                server_path: config.server_override().map(str::to_owned),
                timeouts: config.timeouts.clone(),
                launcher,
                registry: Mutex::new(HashMap::new()),
                desired: Mutex::new(Vec::new()),
                reconciling: Mutex::new(()),
                events,
            }),
        }
    }

    /// Register `workspace` and launch its server in the background.
    ///
    /// Returns as soon as the entry is registered; progress is reported
    /// through [`SupervisorEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnsupportedWorkspace` if the workspace has no local
    /// root, or `AppError::AlreadySupervised` if it already has a session.
    pub async fn start(&self, workspace: Workspace) -> Result<()> {
        let root = workspace
            .local_root()
            .ok_or_else(|| AppError::UnsupportedWorkspace(workspace.to_string()))?;

        let mut registry = self.inner.registry.lock().await;
        if registry.contains_key(&workspace) {
            return Err(AppError::AlreadySupervised(workspace.to_string()));
        }

        let attempt = Uuid::new_v4();
        let cancel = CancellationToken::new();
        info!(workspace = %workspace, %attempt, "starting session");

        let task = tokio::spawn(self.clone().run_session(
            workspace.clone(),
            root,
            attempt,
            cancel.clone(),
        ));
        registry.insert(workspace, Session::Invoking(Launch::new(attempt, cancel, task)));
        Ok(())
    }

    /// Stop the session for `workspace`, if any, and wait until its channel
    /// is closed and its processes are gone.
    pub async fn stop(&self, workspace: &Workspace) {
        let removed = self.inner.registry.lock().await.remove(workspace);
        let Some(session) = removed else {
            debug!(workspace = %workspace, "stop requested for unsupervised workspace");
            return;
        };

        info!(
            workspace = %workspace,
            attempt = %session.attempt(),
            running = session.is_running(),
            "stopping session"
        );
        if let Err(err) = session.into_launch().shutdown().await {
            warn!(workspace = %workspace, %err, "session teardown failed");
        }
    }

    /// Stop then start `workspace`, provided it is still desired or live.
    ///
    /// Runs under the reconcile lock, so a concurrent reconcile that drops
    /// the workspace either happens first (and the restart is refused) or
    /// after (and stops the new session).
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownWorkspace` if the workspace is neither
    /// desired nor supervised; otherwise propagates errors from
    /// [`Supervisor::start`].
    pub async fn restart(&self, workspace: &Workspace) -> Result<()> {
        let _guard = self.inner.reconciling.lock().await;
        if !self.is_tracked(workspace).await {
            return Err(AppError::UnknownWorkspace(workspace.to_string()));
        }
        self.restart_locked(workspace).await
    }

    /// Look up a desired or live workspace by name and restart it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownWorkspace` if no desired or live workspace
    /// has that name; otherwise propagates errors from [`Supervisor::start`].
    pub async fn restart_named(&self, name: &str) -> Result<Workspace> {
        let _guard = self.inner.reconciling.lock().await;
        let workspace = self
            .find(name)
            .await
            .ok_or_else(|| AppError::UnknownWorkspace(name.to_owned()))?;
        self.restart_locked(&workspace).await?;
        Ok(workspace)
    }

    async fn restart_locked(&self, workspace: &Workspace) -> Result<()> {
        self.stop(workspace).await;
        self.start(workspace.clone()).await
    }

    async fn is_tracked(&self, workspace: &Workspace) -> bool {
        self.inner.desired.lock().await.contains(workspace) || self.is_supervised(workspace).await
    }

    /// Restart every workspace of the last reconciled set, plus any other
    /// live session.
    pub async fn restart_all(&self) {
        let _guard = self.inner.reconciling.lock().await;

        let mut targets = self.inner.desired.lock().await.clone();
        {
            let registry = self.inner.registry.lock().await;
            for ws in registry.keys() {
                if !targets.contains(ws) {
                    targets.push(ws.clone());
                }
            }
        }

        info!(count = targets.len(), "restarting all sessions");
        for ws in &targets {
            if let Err(err) = self.restart_locked(ws).await {
                warn!(workspace = %ws, %err, "restart failed");
            }
        }
    }

    /// Converge the registry onto `desired`.
    ///
    /// Sessions for workspaces no longer desired are stopped first, then
    /// missing eligible workspaces are started. Non-local workspaces are
    /// ignored. Concurrent calls are serialised.
    pub async fn reconcile(&self, desired: &[Workspace]) -> ReconcilePlan {
        let _guard = self.inner.reconciling.lock().await;

        let eligible = reconcile::eligible(desired);
        let skipped = desired.len() - eligible.len();
        if skipped > 0 {
            debug!(skipped, "ignoring non-local or duplicate workspaces");
        }
        self.inner.desired.lock().await.clone_from(&eligible);

        let plan = {
            let registry = self.inner.registry.lock().await;
            reconcile::plan(registry.keys(), &eligible)
        };
        if plan.is_empty() {
            debug!("registry already matches desired workspaces");
            return plan;
        }

        info!(stop = plan.stop.len(), start = plan.start.len(), "reconciling");
        for ws in &plan.stop {
            self.stop(ws).await;
        }
        for ws in &plan.start {
            if let Err(err) = self.start(ws.clone()).await {
                warn!(workspace = %ws, %err, "failed to start session");
            }
        }
        plan
    }

    /// Current registry contents, ordered by workspace name.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        let registry = self.inner.registry.lock().await;
        let mut summaries: Vec<SessionSummary> = registry
            .iter()
            .map(|(ws, session)| session.summary(ws))
            .collect();
        summaries.sort_by(|a, b| a.workspace.name.cmp(&b.workspace.name));
        summaries
    }

    /// Whether `workspace` has a session in either state.
    pub async fn is_supervised(&self, workspace: &Workspace) -> bool {
        self.inner.registry.lock().await.contains_key(workspace)
    }

    /// Look up a desired or live workspace by name.
    pub async fn find(&self, name: &str) -> Option<Workspace> {
        if let Some(ws) = self.inner.desired.lock().await.iter().find(|ws| ws.name == name) {
            return Some(ws.clone());
        }
        self.inner
            .registry
            .lock()
            .await
            .keys()
            .find(|ws| ws.name == name)
            .cloned()
    }

    /// Stop every session and forget the desired set.
    pub async fn shutdown(&self) {
        let _guard = self.inner.reconciling.lock().await;
        self.inner.desired.lock().await.clear();

        let sessions: Vec<(Workspace, Session)> =
            self.inner.registry.lock().await.drain().collect();
        info!(count = sessions.len(), "shutting down sessions");

        for (ws, session) in sessions {
            if let Err(err) = session.into_launch().shutdown().await {
                warn!(workspace = %ws, %err, "session teardown failed");
            }
        }
    }

    async fn run_session(
        self,
        workspace: Workspace,
        root: PathBuf,
        attempt: Uuid,
        cancel: CancellationToken,
    ) {
        let span = info_span!("session", workspace = %workspace.name, %attempt);

        async move {
            let (connection, version) = match self.launch(&workspace, &root, &cancel).await {
                Ok(pair) => pair,
                Err(err) if cancel.is_cancelled() => {
                    info!(%err, "session stopped before its channel was established");
                    return;
                }
                Err(err) => {
                    self.fail_attempt(&workspace, attempt, &err).await;
                    return;
                }
            };

            let info = ChannelInfo::new(connection.endpoint(), version);
            if !self.promote(&workspace, attempt, info).await {
                info!("session was superseded during launch; discarding connection");
                connection.close().await;
                return;
            }

            let (host_end, bridge_end) = channel_pair();
            self.emit(SupervisorEvent::ChannelReady {
                workspace: workspace.clone(),
                channel: host_end,
            });
            self.emit(SupervisorEvent::Status(StatusUpdate::persistent(
                workspace.clone(),
                format!("{} is running", self.inner.tool.display_name),
            )));

            let closed = connection.run(bridge_end, cancel).await;
            if closed != ChannelClosed::Cancelled && self.remove_if_current(&workspace, attempt).await
            {
                self.emit(SupervisorEvent::Status(StatusUpdate::transient(
                    workspace.clone(),
                    format!("{} stopped", self.inner.tool.display_name),
                )));
            }
        }
        .instrument(span)
        .await;
    }

    async fn launch(
        &self,
        workspace: &Workspace,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<(Connection, ToolVersion)> {
        let inner = &self.inner;
        let server_path = inner.server_path.as_deref();

        let probe = resolve(root, server_path, &inner.tool, &inner.tool.version_arg);
        let version = probe_version(
            &inner.launcher,
            root,
            &probe,
            &inner.tool,
            &inner.timeouts,
            cancel,
        )
        .await?;

        self.emit(SupervisorEvent::Status(StatusUpdate::transient(
            workspace.clone(),
            starting_status(&inner.tool, &version),
        )));

        let server = resolve(root, server_path, &inner.tool, &inner.tool.server_arg);
        let events = inner.events.clone();
        let source = workspace.clone();
        let on_diagnostic = move |line: String| {
            info!(workspace = %source.name, line = %line, "server diagnostic");
            let sent = events.send(SupervisorEvent::Diagnostic {
                workspace: source.clone(),
                line,
            });
            if sent.is_err() {
                debug!("event receiver dropped");
            }
        };

        let handshake = start_handshake(
            &inner.launcher,
            root,
            &server,
            &inner.timeouts,
            cancel,
            on_diagnostic,
        )
        .await?;
        let connection = Connection::open(handshake, &inner.timeouts).await?;
        Ok((connection, version))
    }

    async fn fail_attempt(&self, workspace: &Workspace, attempt: Uuid, err: &AppError) {
        if err.is_probe_rejection() {
            info!(%err, "tool rejected for workspace");
        } else {
            warn!(%err, "failed to start server");
        }

        if self.remove_if_current(workspace, attempt).await {
            self.emit(SupervisorEvent::Status(StatusUpdate::transient(
                workspace.clone(),
                failure_status(&self.inner.tool, err),
            )));
        }
    }

    async fn promote(&self, workspace: &Workspace, attempt: Uuid, info: ChannelInfo) -> bool {
        let mut registry = self.inner.registry.lock().await;
        let Some(session) = registry.remove(workspace) else {
            return false;
        };

        if session.attempt() != attempt {
            registry.insert(workspace.clone(), session);
            return false;
        }

        match session.promote(info) {
            Ok(running) => {
                registry.insert(workspace.clone(), running);
                true
            }
            Err(unchanged) => {
                warn!("session already running; keeping existing channel");
                registry.insert(workspace.clone(), unchanged);
                false
            }
        }
    }

    async fn remove_if_current(&self, workspace: &Workspace, attempt: Uuid) -> bool {
        let mut registry = self.inner.registry.lock().await;
        if registry.get(workspace).map(Session::attempt) == Some(attempt) {
            registry.remove(workspace);
            true
        } else {
            false
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
