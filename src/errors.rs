//! Error types shared across the supervisor.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all supervisor failure modes.
///
/// The start-attempt variants (`ToolUnavailable` through `TransportFailed`)
/// are terminal for one attempt and are absorbed by the supervisor; they
/// only ever reach the host as a status string.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
    /// Workspace is not locally addressable (non-`file` scheme).
    UnsupportedWorkspace(String),
    /// A session is already registered for the workspace.
    AlreadySupervised(String),
    /// The workspace is neither desired nor supervised.
    UnknownWorkspace(String),
    /// The tool could not be spawned, or its version probe exited non-zero.
    ToolUnavailable(String),
    /// The version probe output did not match `name MAJOR.MINOR.PATCH`.
    VersionUnparseable(String),
    /// The reported version is below the configured minimum.
    VersionTooOld(String),
    /// The server-mode process exited (or timed out) before its handshake.
    HandshakeFailed(String),
    /// The announced endpoint could not be connected to.
    TransportFailed(String),
    /// Terminating a process or channel failed.
    Teardown(String),
}

impl AppError {
    /// Whether the error came from the version gate rather than from the
    /// server-mode launch.
    #[must_use]
    pub fn is_probe_rejection(&self) -> bool {
        matches!(
            self,
            Self::ToolUnavailable(_) | Self::VersionUnparseable(_) | Self::VersionTooOld(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::UnsupportedWorkspace(msg) => write!(f, "unsupported workspace: {msg}"),
            Self::AlreadySupervised(msg) => write!(f, "already supervised: {msg}"),
            Self::UnknownWorkspace(msg) => write!(f, "unknown workspace: {msg}"),
            Self::ToolUnavailable(msg) => write!(f, "tool unavailable: {msg}"),
            Self::VersionUnparseable(msg) => write!(f, "version unparseable: {msg}"),
            Self::VersionTooOld(msg) => write!(f, "version too old: {msg}"),
            Self::HandshakeFailed(msg) => write!(f, "handshake failed: {msg}"),
            Self::TransportFailed(msg) => write!(f, "transport failed: {msg}"),
            Self::Teardown(msg) => write!(f, "teardown: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
