//! Hot-reload watcher for the `[[workspace]]` list in `config.toml`.
//!
//! [`ConfigWatcher`] uses the `notify` crate to watch the directory holding
//! the config file. On every change it re-parses only the `[[workspace]]`
//! entries and sends the new list to the daemon, which reconciles the
//! supervisor against it. All other settings require a restart.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use analysis_supervisor::config_watcher::ConfigWatcher;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let watcher = ConfigWatcher::new(Path::new("config.toml"), tx).expect("watcher");
//! ```
//!
//! The `notify` callback runs on a plain OS thread, so delivery uses an
//! unbounded channel whose `send` never blocks or awaits.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::models::workspace::Workspace;
use crate::{AppError, Result};

/// Only the `[[workspace]]` array; every other key is ignored.
#[derive(Debug, Deserialize)]
struct WorkspacesOnly {
    #[serde(default, rename = "workspace")]
    workspace: Vec<Workspace>,
}

/// Parse the `[[workspace]]` entries from a TOML file.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be read or its
/// `[[workspace]]` entries are malformed.
pub fn parse_workspaces(path: &Path) -> Result<Vec<Workspace>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::Config(format!("failed to read config for workspace reload: {err}"))
    })?;
    let parsed: WorkspacesOnly = toml::from_str(&raw).map_err(|err| {
        AppError::Config(format!("failed to parse workspaces from config: {err}"))
    })?;
    Ok(parsed.workspace)
}

fn is_config_change(event: &Event, config_path: &Path) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    let file_name = config_path.file_name();
    relevant_kind
        && (event.paths.is_empty()
            || event.paths.iter().any(|p| p.file_name() == file_name))
}

/// Watches the config file and publishes workspace-list changes.
///
/// Dropping the watcher stops the OS watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Start watching `config_path`; every successfully parsed workspace list
    /// is sent on `updates`.
    ///
    /// A change that fails to parse is logged and skipped, keeping the
    /// previous list in force.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the `notify` watcher cannot be created
    /// or the path cannot be watched.
    pub fn new(config_path: &Path, updates: UnboundedSender<Vec<Workspace>>) -> Result<Self> {
        let path_for_callback = config_path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_change(&event, &path_for_callback) => {
                    match parse_workspaces(&path_for_callback) {
                        Ok(workspaces) => {
                            info!(
                                path = %path_for_callback.display(),
                                count = workspaces.len(),
                                "reloaded workspace list from config"
                            );
                            if updates.send(workspaces).is_err() {
                                debug!("workspace update receiver dropped");
                            }
                        }
                        Err(err) => {
                            warn!(
                                %err,
                                path = %path_for_callback.display(),
                                "failed to reload workspaces; keeping previous list"
                            );
                        }
                    }
                }
                Err(err) => warn!(%err, "config file watcher error"),
                Ok(_) => {}
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch the parent so write-then-rename saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(config_path);

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to watch config path '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %config_path.display(), "config watcher started");

        Ok(Self {
            _watcher: watcher,
            path: config_path.to_path_buf(),
        })
    }

    /// The watched config file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
