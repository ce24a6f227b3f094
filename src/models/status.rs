//! Status strings surfaced to the host, keyed by workspace.

use std::time::Duration;

use crate::models::workspace::Workspace;

/// How long a transient status stays visible before the host hides it.
pub const TRANSIENT_STATUS_TTL: Duration = Duration::from_secs(3);

/// A short human-readable status for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Workspace the status belongs to.
    pub workspace: Workspace,
    /// Text to display.
    pub message: String,
    /// `Some` for transient statuses; `None` keeps the status until superseded.
    pub expires_after: Option<Duration>,
}

impl StatusUpdate {
    /// A status that auto-expires after [`TRANSIENT_STATUS_TTL`].
    #[must_use]
    pub fn transient(workspace: Workspace, message: impl Into<String>) -> Self {
        Self {
            workspace,
            message: message.into(),
            expires_after: Some(TRANSIENT_STATUS_TTL),
        }
    }

    /// A status that persists until the next one for the same workspace.
    #[must_use]
    pub fn persistent(workspace: Workspace, message: impl Into<String>) -> Self {
        Self {
            workspace,
            message: message.into(),
            expires_after: None,
        }
    }

    /// Whether the status auto-expires.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.expires_after.is_some()
    }
}
