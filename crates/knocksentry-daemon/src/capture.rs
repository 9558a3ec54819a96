//! Capture abstraction.
//!
//! The engine never touches network media; it consumes observations from a
//! [`Capture`] implementation. The bundled backend reads one JSON object per
//! line, which is what flow exporters and packet post-processors are
//! typically scripted to emit. Anything that can produce
//! `{"source_identity": "...", "destination_port": N, "timestamp_ms": N}`
//! lines can feed the daemon.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::warn;

use knocksentry_core::RawObservation;

/// A source of raw observations.
#[async_trait]
pub trait Capture: Send {
    /// The next observation, or `None` when the feed is exhausted.
    async fn next_observation(&mut self) -> Result<Option<RawObservation>>;
}

/// Reads newline-delimited JSON observations from any async byte stream.
///
/// Lines that fail to parse are logged, counted, and skipped -- a corrupt
/// line from a capture feed must not take the daemon down.
pub struct JsonLinesCapture<R> {
    lines: Lines<BufReader<R>>,
    parse_errors: u64,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesCapture<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            parse_errors: 0,
        }
    }

    /// Number of lines skipped because they failed to parse.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }
}

impl JsonLinesCapture<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Capture for JsonLinesCapture<R> {
    async fn next_observation(&mut self) -> Result<Option<RawObservation>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawObservation>(trimmed) {
                Ok(raw) => return Ok(Some(raw)),
                Err(e) => {
                    self.parse_errors += 1;
                    warn!(error = %e, "skipping unparseable capture line");
                }
            }
        }
        Ok(None)
    }
}
