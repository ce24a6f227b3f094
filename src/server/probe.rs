//! Version probe.
//!
//! Runs `<tool> --version` in the workspace root, collects stdout until the
//! process exits and gates the session on the reported version. The probe
//! process is always terminated afterwards, whatever the verdict, including
//! when the attempt is cancelled mid-probe.

use std::path::Path;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{TimeoutConfig, ToolConfig};
use crate::launcher::process::Launcher;
use crate::launcher::resolver::ResolvedCommand;
use crate::models::version::ToolVersion;
use crate::server::codec::forward_lines;
use crate::server::with_limit;
use crate::{AppError, Result};

/// Launch `command` (already suffixed with the version argument) and
/// validate its report.
///
/// # Errors
///
/// - `AppError::ToolUnavailable`: spawn failure, non-zero or missing exit
///   code, the probe timed out, or `cancel` fired first.
/// - `AppError::VersionUnparseable`: output is not `name X.Y.Z`.
/// - `AppError::VersionTooOld`: version below `tool.minimum_version`.
pub async fn probe_version(
    launcher: &Launcher,
    root: &Path,
    command: &ResolvedCommand,
    tool: &ToolConfig,
    timeouts: &TimeoutConfig,
    cancel: &CancellationToken,
) -> Result<ToolVersion> {
    let span = info_span!("probe_version", tool = %tool.name, root = %root.display());

    async move {
        let mut process = launcher.spawn(command, root)?;
        let mut stdout = process.take_stdout()?;
        let stderr = process.take_stderr()?;
        let pid = process.pid();

        let collect = with_limit(timeouts.probe(), async {
            let mut raw = Vec::new();
            let (read, ()) = tokio::join!(
                stdout.read_to_end(&mut raw),
                forward_lines(stderr, |line| debug!(?pid, line = %line, "probe stderr")),
            );
            read.map_err(|err| AppError::Io(format!("failed to read probe output: {err}")))?;
            let code = process.wait().await?;
            Ok::<_, AppError>((code, String::from_utf8_lossy(&raw).into_owned()))
        });

        let verdict = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::ToolUnavailable(format!(
                "{} --version cancelled",
                tool.name
            ))),
            collected = collect => match collected {
                Some(Ok((code, output))) => {
                    info!(?pid, ?code, output = output.trim(), "probe finished");
                    evaluate_probe(code, &output, tool)
                }
                Some(Err(err)) => Err(AppError::ToolUnavailable(format!(
                    "failed to invoke {}: {err}",
                    tool.name
                ))),
                None => Err(AppError::ToolUnavailable(format!(
                    "{} --version did not finish within {:?}",
                    tool.name,
                    timeouts.probe().unwrap_or_default()
                ))),
            },
        };

        if let Err(err) = process.terminate(timeouts.terminate_grace()).await {
            warn!(?pid, %err, "failed to terminate probe process");
        }

        verdict
    }
    .instrument(span)
    .await
}

/// Judge a finished probe from its exit code and stdout.
///
/// # Errors
///
/// See [`probe_version`]; spawn failures cannot occur here.
pub fn evaluate_probe(exit_code: Option<i32>, output: &str, tool: &ToolConfig) -> Result<ToolVersion> {
    match exit_code {
        Some(0) => {}
        Some(code) => {
            return Err(AppError::ToolUnavailable(format!(
                "failed to invoke {}: error code {code}",
                tool.name
            )));
        }
        None => {
            return Err(AppError::ToolUnavailable(format!(
                "failed to invoke {}: terminated by signal",
                tool.name
            )));
        }
    }

    let version = ToolVersion::parse_report(&tool.name, output)?;
    if !version.meets(&tool.minimum_version) {
        return Err(AppError::VersionTooOld(format!(
            "{} version {version} is too old; please use {} or later",
            tool.name, tool.minimum_version
        )));
    }

    Ok(version)
}
