//! Per-workspace session state.
//!
//! A session is `Invoking` from the moment it is registered until its
//! channel is live, then `Running`. The only transition is
//! [`Session::promote`]; leaving either state means removing the entry from
//! the registry, so a restart is always stop-then-start.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::version::ToolVersion;
use crate::models::workspace::Workspace;
use crate::{AppError, Result};

/// The task driving one start attempt, and the token that stops it.
///
/// Cancelling the token while the attempt is still launching interrupts the
/// probe or server process and kills it after the grace period; once
/// running, it closes the channel, which terminates the server the same way.
#[derive(Debug)]
pub struct Launch {
    attempt: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

impl Launch {
    /// Wrap a spawned session task.
    #[must_use]
    pub fn new(attempt: Uuid, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            attempt,
            cancel,
            task,
            started_at: Utc::now(),
        }
    }

    /// Identifier of this start attempt.
    #[must_use]
    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    /// When the attempt was registered.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Cancel the attempt and wait for its task to finish tearing down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Teardown` if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|err| AppError::Teardown(format!("session task {}: {err}", self.attempt)))
    }
}

/// Details of an established message channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Server endpoint the channel is connected to.
    pub endpoint: SocketAddr,
    /// Version reported by the probe for this attempt.
    pub version: ToolVersion,
    /// When the channel went live.
    pub since: DateTime<Utc>,
}

impl ChannelInfo {
    /// Channel details stamped with the current time.
    #[must_use]
    pub fn new(endpoint: SocketAddr, version: ToolVersion) -> Self {
        Self {
            endpoint,
            version,
            since: Utc::now(),
        }
    }
}

/// Registry entry for one workspace.
#[derive(Debug)]
pub enum Session {
    /// Probe, handshake or connect in flight; no channel yet.
    Invoking(Launch),
    /// Channel established.
    Running {
        /// The attempt that got here.
        launch: Launch,
        /// The live channel.
        channel: ChannelInfo,
    },
}

impl Session {
    /// Identifier of the attempt behind this entry.
    #[must_use]
    pub fn attempt(&self) -> Uuid {
        self.launch().attempt()
    }

    /// Whether the channel is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// The attempt behind this entry.
    #[must_use]
    pub fn launch(&self) -> &Launch {
        match self {
            Self::Invoking(launch) | Self::Running { launch, .. } => launch,
        }
    }

    /// Take the attempt out of the entry, discarding channel details.
    #[must_use]
    pub fn into_launch(self) -> Launch {
        match self {
            Self::Invoking(launch) | Self::Running { launch, .. } => launch,
        }
    }

    /// `Invoking` → `Running`.
    ///
    /// # Errors
    ///
    /// Returns the session unchanged if it is already running.
    pub fn promote(self, channel: ChannelInfo) -> std::result::Result<Self, Self> {
        match self {
            Self::Invoking(launch) => Ok(Self::Running { launch, channel }),
            running @ Self::Running { .. } => Err(running),
        }
    }

    /// Serializable view of this entry.
    #[must_use]
    pub fn summary(&self, workspace: &Workspace) -> SessionSummary {
        let launch = self.launch();
        let (phase, endpoint, version) = match self {
            Self::Invoking(_) => (SessionPhase::Invoking, None, None),
            Self::Running { channel, .. } => (
                SessionPhase::Running,
                Some(channel.endpoint),
                Some(channel.version),
            ),
        };
        SessionSummary {
            workspace: workspace.clone(),
            phase,
            attempt: launch.attempt(),
            started_at: launch.started_at(),
            endpoint,
            version,
        }
    }
}

/// Coarse session state for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Launch in flight.
    Invoking,
    /// Channel live.
    Running,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Supervised workspace.
    pub workspace: Workspace,
    /// Current phase.
    pub phase: SessionPhase,
    /// Start attempt identifier.
    pub attempt: Uuid,
    /// When the attempt was registered.
    pub started_at: DateTime<Utc>,
    /// Server endpoint once running.
    pub endpoint: Option<SocketAddr>,
    /// Tool version once running.
    pub version: Option<ToolVersion>,
}
