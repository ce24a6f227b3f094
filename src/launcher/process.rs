//! Process launcher.
//!
//! Spawns the resolved tool command with:
//! - the workspace root as working directory,
//! - piped stdout/stderr and a null stdin,
//! - `kill_on_drop(true)` so an abandoned launch never outlives its handle.
//!
//! When the user's `$SHELL` is bash, zsh or fish the command line runs as
//! `<shell> -l -c "<line>"` so aliases and rc-file functions for the tool
//! resolve. This is a compatibility shim for trusted local configuration,
//! not a sandbox.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::launcher::resolver::ResolvedCommand;
use crate::{AppError, Result};

/// Shell families whose login/command flags are known to work.
pub const LOGIN_SHELLS: &[&str] = &["bash", "zsh", "fish"];

/// Pick a login shell from a `$SHELL` value.
#[must_use]
pub fn detect_login_shell(shell_env: Option<&str>) -> Option<PathBuf> {
    let shell = shell_env?.trim();
    if shell.is_empty() {
        return None;
    }
    LOGIN_SHELLS
        .iter()
        .any(|name| shell.ends_with(name))
        .then(|| PathBuf::from(shell))
}

/// Spawns tool commands, directly or through a login shell.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    login_shell: Option<PathBuf>,
}

impl Launcher {
    /// Execute commands directly, never through a shell.
    #[must_use]
    pub fn direct() -> Self {
        Self { login_shell: None }
    }

    /// Detect a login shell from the `SHELL` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            login_shell: detect_login_shell(std::env::var("SHELL").ok().as_deref()),
        }
    }

    /// Always run through `shell`.
    #[must_use]
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            login_shell: Some(shell.into()),
        }
    }

    /// Launcher matching the `login_shell` configuration switch.
    #[must_use]
    pub fn for_config(login_shell: bool) -> Self {
        if login_shell {
            Self::from_env()
        } else {
            Self::direct()
        }
    }

    /// The shell commands run through, if any.
    #[must_use]
    pub fn login_shell(&self) -> Option<&Path> {
        self.login_shell.as_deref()
    }

    /// Build (but do not spawn) the command for `cmd` in `cwd`.
    #[must_use]
    pub fn command(&self, cmd: &ResolvedCommand, cwd: &Path) -> Command {
        let mut command = if let Some(ref shell) = self.login_shell {
            let mut c = Command::new(shell);
            c.arg("-l").arg("-c").arg(cmd.shell_line());
            c
        } else {
            let mut c = Command::new(&cmd.program);
            c.args(&cmd.args);
            c
        };

        command
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Spawn `cmd` in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ToolUnavailable` if the OS refuses to start the
    /// process.
    pub fn spawn(&self, cmd: &ResolvedCommand, cwd: &Path) -> Result<ProcessHandle> {
        let child = self.command(cmd, cwd).spawn().map_err(|err| {
            AppError::ToolUnavailable(format!("failed to spawn `{cmd}`: {err}"))
        })?;

        let pid = child.id();
        debug!(
            ?pid,
            command = %cmd,
            cwd = %cwd.display(),
            shell = ?self.login_shell,
            "tool process spawned"
        );

        Ok(ProcessHandle {
            child,
            pid,
            label: cmd.to_string(),
        })
    }
}

/// A spawned tool process.
///
/// [`ProcessHandle::terminate`] consumes the handle, so a process is
/// terminated at most once.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    label: String,
}

impl ProcessHandle {
    /// OS process id captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Command line this process was started with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the stdout pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the pipe was already taken.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture tool stdout".into()))
    }

    /// Take the stderr pipe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the pipe was already taken.
    pub fn take_stderr(&mut self) -> Result<ChildStderr> {
        self.child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture tool stderr".into()))
    }

    /// Wait for exit; `None` means the process was killed by a signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if waiting on the child fails.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| AppError::Io(format!("wait error: {err}")))?;
        Ok(status.code())
    }

    /// Terminate the process: interrupt, wait `grace`, then force-kill.
    ///
    /// A process that has already exited is only reaped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Teardown` if the process could not be killed.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(pid = ?self.pid, ?status, "tool process already exited");
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                if let Err(err) = send_interrupt(pid) {
                    warn!(pid, %err, "interrupt failed, falling back to kill");
                }
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, ?status, "tool process exited");
                Ok(())
            }
            Ok(Err(err)) => Err(AppError::Teardown(format!(
                "error waiting for pid {:?}: {err}",
                self.pid
            ))),
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    "tool process did not exit within grace period, forcing kill"
                );
                self.child.kill().await.map_err(|err| {
                    AppError::Teardown(format!("failed to kill pid {:?}: {err}", self.pid))
                })
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Teardown(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGINT)
        .map_err(|err| AppError::Teardown(format!("failed to interrupt pid {pid}: {err}")))
}
