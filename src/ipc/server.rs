//! Local IPC server for `analysis-supervisor-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate and routes line-delimited JSON commands
//! to the [`Supervisor`].
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "restart"}
//! {"command": "restart", "workspace": "app"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown workspace: app"}
//! ```

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::supervisor::Supervisor;
use crate::{AppError, Result};

/// Inbound request from `analysis-supervisor-ctl`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Target workspace name (for `restart`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Outbound response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task on the local socket `name`.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    supervisor: Supervisor,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, supervisor.clone()));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, supervisor: Supervisor) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &supervisor).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route one request to the supervisor.
pub async fn dispatch_command(request: &IpcRequest, supervisor: &Supervisor) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);

    async move {
        match request.command.as_str() {
            "list" => handle_list(supervisor).await,
            "restart" => handle_restart(request, supervisor).await,
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}

async fn handle_list(supervisor: &Supervisor) -> IpcResponse {
    let sessions = supervisor.snapshot().await;
    match serde_json::to_value(&sessions) {
        Ok(items) => IpcResponse::success(serde_json::json!({ "sessions": items })),
        Err(err) => IpcResponse::error(format!("failed to serialize sessions: {err}")),
    }
}

/// Restart one named workspace, or every workspace when none is given.
async fn handle_restart(request: &IpcRequest, supervisor: &Supervisor) -> IpcResponse {
    let Some(ref name) = request.workspace else {
        supervisor.restart_all().await;
        info!("all sessions restarted via IPC");
        return IpcResponse::success(serde_json::json!({ "restarted": "all" }));
    };

    match supervisor.restart_named(name).await {
        Ok(workspace) => {
            info!(workspace = %workspace, "session restarted via IPC");
            IpcResponse::success(serde_json::json!({ "restarted": workspace.name }))
        }
        Err(err @ AppError::UnknownWorkspace(_)) => IpcResponse::error(err.to_string()),
        Err(err) => IpcResponse::error(format!("failed to restart: {err}")),
    }
}
