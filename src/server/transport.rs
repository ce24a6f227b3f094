//! Transport adapter.
//!
//! Connects to the endpoint from the handshake and bridges the TCP stream to
//! an in-memory duplex pipe whose other end is handed to the host as the
//! session's message channel. Whichever side closes first ends the bridge,
//! and the end of the bridge always terminates the server process.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::launcher::process::ProcessHandle;
use crate::server::handshake::Handshake;
use crate::server::with_limit;
use crate::{AppError, Result};

/// Buffer size of the in-memory pipe between host and bridge.
pub const CHANNEL_BUFFER_BYTES: usize = 64 * 1024;

/// The host's end of a live session: a bidirectional byte stream carrying
/// the analysis protocol.
pub type MessageChannel = DuplexStream;

/// Create a connected pair: `(host end, bridge end)`.
#[must_use]
pub fn channel_pair() -> (MessageChannel, DuplexStream) {
    tokio::io::duplex(CHANNEL_BUFFER_BYTES)
}

/// Why a bridged channel stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClosed {
    /// The server closed the TCP connection (or it failed).
    Server,
    /// The host dropped or shut down its end.
    Client,
    /// The supervisor stopped the session.
    Cancelled,
}

/// An open connection to a server, owning the server process.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    endpoint: SocketAddr,
    process: ProcessHandle,
    grace: Duration,
}

impl Connection {
    /// Connect to the endpoint announced in `handshake`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportFailed` if the connection cannot be
    /// established within the connect timeout. The server process is
    /// terminated before the error is returned.
    pub async fn open(handshake: Handshake, timeouts: &TimeoutConfig) -> Result<Self> {
        let Handshake { payload, process } = handshake;
        let grace = timeouts.terminate_grace();
        let target = format!("{}:{}", payload.host, payload.port);

        let connected = with_limit(
            timeouts.connect(),
            TcpStream::connect((payload.host.as_str(), payload.port)),
        )
        .await;

        let failure = match connected {
            Some(Ok(stream)) => match stream.peer_addr() {
                Ok(endpoint) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%err, "failed to set TCP_NODELAY");
                    }
                    info!(%endpoint, pid = ?process.pid(), "connected to server");
                    return Ok(Self {
                        stream,
                        endpoint,
                        process,
                        grace,
                    });
                }
                Err(err) => format!("connected to {target} but peer address is unavailable: {err}"),
            },
            Some(Err(err)) => format!("cannot connect to {target}: {err}"),
            None => format!(
                "cannot connect to {target} within {:?}",
                timeouts.connect().unwrap_or_default()
            ),
        };

        if let Err(err) = process.terminate(grace).await {
            warn!(%err, "failed to terminate server after connect failure");
        }
        Err(AppError::TransportFailed(failure))
    }

    /// Address of the connected server.
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Drop the connection without bridging it and terminate the server.
    pub async fn close(self) {
        let Self {
            stream,
            endpoint,
            process,
            grace,
        } = self;
        drop(stream);
        if let Err(err) = process.terminate(grace).await {
            warn!(%endpoint, %err, "failed to terminate discarded server");
        }
    }

    /// Pump bytes between the server and `channel` until either side closes
    /// or `cancel` fires, then terminate the server.
    ///
    /// The server process is terminated exactly once, here.
    pub async fn run(self, channel: DuplexStream, cancel: CancellationToken) -> ChannelClosed {
        let Self {
            stream,
            endpoint,
            process,
            grace,
        } = self;

        let (mut tcp_read, mut tcp_write) = stream.into_split();
        let (mut local_read, mut local_write) = tokio::io::split(channel);

        let closed = tokio::select! {
            biased;

            () = cancel.cancelled() => ChannelClosed::Cancelled,

            result = tokio::io::copy(&mut tcp_read, &mut local_write) => {
                match result {
                    Ok(bytes) => {
                        debug!(%endpoint, bytes, "server closed the connection");
                        ChannelClosed::Server
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!(%endpoint, "host end of the channel is gone");
                        ChannelClosed::Client
                    }
                    Err(err) => {
                        debug!(%endpoint, %err, "server connection failed");
                        ChannelClosed::Server
                    }
                }
            }

            result = tokio::io::copy(&mut local_read, &mut tcp_write) => {
                if let Err(err) = result {
                    debug!(%endpoint, %err, "channel pump to server failed");
                }
                ChannelClosed::Client
            }
        };

        drop((tcp_read, tcp_write, local_read, local_write));
        info!(%endpoint, ?closed, "message channel closed");

        if let Err(err) = process.terminate(grace).await {
            warn!(%endpoint, %err, "failed to terminate server after channel close");
        }

        closed
    }
}
