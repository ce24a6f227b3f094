//! Supervisor configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::version::ToolVersion;
use crate::models::workspace::Workspace;
use crate::{AppError, Result};

/// Description of the external analysis tool and how to invoke it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ToolConfig {
    /// Bare executable name, also the first word of the `--version` report.
    pub name: String,
    /// Human-readable name used in status strings.
    pub display_name: String,
    /// Conventional executable location relative to the workspace root.
    pub local_bin: String,
    /// Dependency manifest whose presence selects the run prefix.
    pub manifest: String,
    /// Dependency-manager prefix used when the manifest exists.
    pub run_prefix: Vec<String>,
    /// Argument selecting version-report mode.
    pub version_arg: String,
    /// Argument selecting server mode.
    pub server_arg: String,
    /// Oldest accepted version.
    pub minimum_version: ToolVersion,
    /// Advice appended to the "not configured" status.
    pub setup_hint: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: "typeprof".into(),
            display_name: "Ruby TypeProf".into(),
            local_bin: "bin/typeprof".into(),
            manifest: "Gemfile".into(),
            run_prefix: vec!["bundle".into(), "exec".into()],
            version_arg: "--version".into(),
            server_arg: "--lsp".into(),
            minimum_version: ToolVersion::new(0, 20, 0),
            setup_hint: "Try to add \"gem 'typeprof'\" to Gemfile".into(),
        }
    }
}

/// Timeout policy (seconds) for each suspension point; `0` disables a limit.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimeoutConfig {
    /// Version probe: spawn until exit.
    pub probe_seconds: u64,
    /// Server mode: spawn until the handshake payload is parsed.
    pub handshake_seconds: u64,
    /// TCP connect to the announced endpoint.
    pub connect_seconds: u64,
    /// Wait after the interrupt signal before force-killing.
    pub terminate_grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_seconds: 30,
            handshake_seconds: 60,
            connect_seconds: 10,
            terminate_grace_seconds: 5,
        }
    }
}

impl TimeoutConfig {
    /// Probe limit, `None` when disabled.
    #[must_use]
    pub fn probe(&self) -> Option<Duration> {
        limit(self.probe_seconds)
    }

    /// Handshake limit, `None` when disabled.
    #[must_use]
    pub fn handshake(&self) -> Option<Duration> {
        limit(self.handshake_seconds)
    }

    /// Connect limit, `None` when disabled.
    #[must_use]
    pub fn connect(&self) -> Option<Duration> {
        limit(self.connect_seconds)
    }

    /// Grace period between interrupt and kill.
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }
}

fn limit(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn default_ipc_name() -> String {
    "analysis-supervisor".into()
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SupervisorConfig {
    /// Master switch; when false the daemon supervises nothing.
    pub enable: bool,
    /// Explicit path or command line for the tool.
    pub server_path: Option<String>,
    /// Run the tool through the user's login shell when one is detected.
    pub login_shell: bool,
    /// Named pipe / Unix socket identifier for the control surface.
    pub ipc_name: String,
    /// Tool profile.
    pub tool: ToolConfig,
    /// Timeout policy.
    pub timeouts: TimeoutConfig,
    /// Workspaces to supervise.
    #[serde(rename = "workspace")]
    pub workspaces: Vec<Workspace>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enable: true,
            server_path: None,
            login_shell: true,
            ipc_name: default_ipc_name(),
            tool: ToolConfig::default(),
            timeouts: TimeoutConfig::default(),
            workspaces: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// User override for the tool command, ignoring blank values.
    #[must_use]
    pub fn server_override(&self) -> Option<&str> {
        self.server_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.tool.name.trim().is_empty() {
            return Err(AppError::Config("tool.name must not be empty".into()));
        }

        if self.tool.server_arg.trim().is_empty() {
            return Err(AppError::Config("tool.server_arg must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for ws in &self.workspaces {
            if !seen.insert(ws.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate workspace name '{}'",
                    ws.name
                )));
            }
        }

        Ok(())
    }
}
