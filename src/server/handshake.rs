//! Server-mode launch and endpoint handshake.
//!
//! The tool started with its server argument announces where to connect by
//! writing one JSON object to stdout:
//!
//! ```json
//! {"host": "127.0.0.1", "port": 4000, "pid": 123}
//! ```
//!
//! Stdout is accumulated and re-parsed after every read, so an announcement
//! split across reads is still recognised, and any noise printed before the
//! first `{` is skipped. Stderr is forwarded line by line to the caller's
//! diagnostic sink for the life of the process.
//!
//! If the process closes stdout (exits) before a payload parses, the attempt
//! fails with the exit code. There is no retry.

use std::path::Path;

use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::TimeoutConfig;
use crate::launcher::process::{Launcher, ProcessHandle};
use crate::launcher::resolver::ResolvedCommand;
use crate::server::codec::forward_lines;
use crate::server::with_limit;
use crate::{AppError, Result};

/// Upper bound on stdout buffered while waiting for the announcement.
pub const MAX_HANDSHAKE_BYTES: usize = 64 * 1024;

/// Endpoint announcement written by the server on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandshakePayload {
    /// Host to connect to.
    pub host: String,
    /// TCP port to connect to.
    pub port: u16,
    /// Server process id as reported by the server itself.
    pub pid: u32,
}

/// Incremental parser for the handshake announcement.
#[derive(Debug, Default)]
pub struct HandshakeDecoder {
    buffer: Vec<u8>,
}

enum Step {
    Done(HandshakePayload),
    NeedMore,
    Skip,
}

impl HandshakeDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and try to complete the announcement.
    ///
    /// Returns `Ok(None)` while more input is needed. Bytes after a complete
    /// payload are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::HandshakeFailed` once more than
    /// [`MAX_HANDSHAKE_BYTES`] are buffered without a payload.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<HandshakePayload>> {
        self.buffer.extend_from_slice(chunk);

        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == b'{') else {
                self.buffer.clear();
                return Ok(None);
            };
            self.buffer.drain(..start);

            let step = {
                let mut values =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<HandshakePayload>();
                match values.next() {
                    Some(Ok(payload)) => Step::Done(payload),
                    Some(Err(err)) if err.is_eof() => Step::NeedMore,
                    Some(Err(_)) | None => Step::Skip,
                }
            };

            match step {
                Step::Done(payload) => {
                    self.buffer.clear();
                    return Ok(Some(payload));
                }
                Step::NeedMore => {
                    if self.buffer.len() > MAX_HANDSHAKE_BYTES {
                        return Err(AppError::HandshakeFailed(format!(
                            "no handshake within the first {MAX_HANDSHAKE_BYTES} bytes of output"
                        )));
                    }
                    return Ok(None);
                }
                Step::Skip => {
                    // Not an announcement; rescan from the next brace.
                    self.buffer.drain(..1);
                }
            }
        }
    }
}

/// A server that has announced its endpoint.
///
/// `process` is the stop handle: terminating it interrupts the server.
#[derive(Debug)]
pub struct Handshake {
    /// The parsed announcement.
    pub payload: HandshakePayload,
    /// The running server process.
    pub process: ProcessHandle,
}

/// Launch the server (`command` already ends with the server argument) and
/// wait for its announcement.
///
/// Every stderr line is passed to `on_diagnostic` in order, from launch until
/// the process closes stderr.
///
/// # Errors
///
/// Returns `AppError::HandshakeFailed` if the process cannot be spawned,
/// exits before announcing, does not announce within the handshake timeout,
/// or `cancel` fires first. The process is terminated, interrupt first, on
/// every error path.
pub async fn start_handshake<F>(
    launcher: &Launcher,
    root: &Path,
    command: &ResolvedCommand,
    timeouts: &TimeoutConfig,
    cancel: &CancellationToken,
    on_diagnostic: F,
) -> Result<Handshake>
where
    F: FnMut(String) + Send + 'static,
{
    let span = info_span!("start_handshake", root = %root.display());

    async move {
        let mut process = launcher
            .spawn(command, root)
            .map_err(|err| AppError::HandshakeFailed(err.to_string()))?;
        let mut stdout = process.take_stdout()?;
        let stderr = process.take_stderr()?;
        let pid = process.pid();

        tokio::spawn(forward_lines(stderr, on_diagnostic));

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(AppError::HandshakeFailed("cancelled before handshake".into()))
            }
            waited = with_limit(timeouts.handshake(), read_payload(&mut stdout, &mut process)) => {
                match waited {
                    Some(result) => result,
                    None => Err(AppError::HandshakeFailed(format!(
                        "no handshake within {:?}",
                        timeouts.handshake().unwrap_or_default()
                    ))),
                }
            }
        };

        match outcome {
            Ok(payload) => {
                info!(?pid, host = %payload.host, port = payload.port, "handshake received");
                // Keep stdout drained so the server never blocks on a full pipe.
                tokio::spawn(forward_lines(stdout, move |line| {
                    debug!(?pid, line = %line, "server stdout");
                }));
                Ok(Handshake { payload, process })
            }
            Err(err) => {
                if let Err(teardown) = process.terminate(timeouts.terminate_grace()).await {
                    warn!(?pid, %teardown, "failed to terminate server after handshake failure");
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

async fn read_payload(
    stdout: &mut ChildStdout,
    process: &mut ProcessHandle,
) -> Result<HandshakePayload> {
    let mut decoder = HandshakeDecoder::new();
    let mut buf = vec![0u8; 8192];

    loop {
        let n = stdout
            .read(&mut buf)
            .await
            .map_err(|err| AppError::HandshakeFailed(format!("stdout read error: {err}")))?;

        if n == 0 {
            let code = process.wait().await?;
            return Err(AppError::HandshakeFailed(format!(
                "server exited before handshake: {}",
                describe_exit(code)
            )));
        }

        if let Some(payload) = decoder.push(&buf[..n])? {
            return Ok(payload);
        }
    }
}

/// Render an exit code the way status strings show it.
#[must_use]
pub fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("error code {c}"),
    )
}
