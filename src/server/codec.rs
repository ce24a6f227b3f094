//! Line codec for the tool's diagnostic stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! tool that writes an unterminated flood to stderr cannot grow the buffer
//! without bound. Partial lines stay buffered until their `\n` arrives, so
//! a line split across reads is delivered once, whole, and in order.

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Maximum diagnostic line length: 64 KiB.
pub const MAX_DIAGNOSTIC_LINE_BYTES: usize = 64 * 1024;

/// Newline-delimited decoder for stderr diagnostics.
///
/// Lines longer than [`MAX_DIAGNOSTIC_LINE_BYTES`] produce
/// `AppError::Io("diagnostic line too long …")` instead of allocating.
#[derive(Debug)]
pub struct DiagnosticCodec(LinesCodec);

impl DiagnosticCodec {
    /// Create a codec with the default [`MAX_DIAGNOSTIC_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_DIAGNOSTIC_LINE_BYTES))
    }
}

impl Default for DiagnosticCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DiagnosticCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Flush a trailing unterminated line when the stream closes.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::Io(format!(
            "diagnostic line too long: exceeded {MAX_DIAGNOSTIC_LINE_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

/// Decode `reader` line by line and hand each complete line to `sink`.
///
/// Runs until the stream closes. A trailing partial line is flushed at EOF.
/// After a framing error the remaining bytes are drained unread so the
/// child never blocks on a full pipe.
pub async fn forward_lines<R, F>(reader: R, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut framed = FramedRead::new(reader, DiagnosticCodec::new());

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => sink(line),
            Err(err) => {
                warn!(%err, "diagnostic stream framing error, discarding the rest");
                break;
            }
        }
    }

    let mut rest = framed.into_inner();
    if let Err(err) = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
        debug!(%err, "diagnostic stream closed with error");
    }
}
