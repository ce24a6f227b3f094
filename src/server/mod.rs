//! Talking to the external analysis server.
//!
//! - `probe`: `--version` gate run before every launch.
//! - `handshake`: server-mode launch and the JSON endpoint announcement.
//! - `codec`: line framing for the server's stderr diagnostics.
//! - `transport`: TCP connection to the announced endpoint, bridged to the
//!   host's message channel.

pub mod codec;
pub mod handshake;
pub mod probe;
pub mod transport;

use std::future::Future;
use std::time::Duration;

/// Await `fut`, giving up after `limit` when one is set.
///
/// Returns `None` when the limit elapsed first.
pub(crate) async fn with_limit<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(duration) => tokio::time::timeout(duration, fut).await.ok(),
        None => Some(fut.await),
    }
}
