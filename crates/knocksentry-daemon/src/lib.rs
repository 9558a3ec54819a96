//! knocksentry daemon orchestration.
//!
//! Ties a capture feed, the bounded ingestion pipeline, the detection
//! engine, and live reporting into a single async process with
//! signal-driven graceful shutdown.

pub mod capture;
pub mod pipeline;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use knocksentry_core::config::EngineSettings;
use knocksentry_core::{Detection, DetectionSummary, Engine, EngineError};

use capture::Capture;
use pipeline::{IngestHandle, Pipeline};
use report::OutputMode;

/// How often idle source windows are swept out of the store.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Backoff before retrying a submission that hit queue overflow.
const OVERFLOW_BACKOFF: Duration = Duration::from_millis(100);

/// The daemon: configuration plus output mode.
pub struct Daemon {
    settings: EngineSettings,
    output: OutputMode,
}

impl Daemon {
    pub fn new(settings: EngineSettings, output: OutputMode) -> Self {
        Self { settings, output }
    }

    /// Run until the capture feed is exhausted or a termination signal
    /// arrives, then drain and report.
    ///
    /// Configuration is validated before any event is processed; a validation
    /// failure aborts startup. Returns the final detection summary.
    pub async fn run<C: Capture + 'static>(self, capture: C) -> Result<DetectionSummary> {
        let engine =
            Arc::new(Engine::new(&self.settings).context("validating configuration")?);
        info!(
            window_ms = self.settings.window_ms,
            patterns = self.settings.catalog().len(),
            "engine started"
        );

        let (detection_tx, mut detection_rx) = mpsc::channel::<Detection>(256);
        let pipeline = Pipeline::start(Arc::clone(&engine), &self.settings, detection_tx);

        // --- Live detection printer ---
        let output = self.output;
        let printer = tokio::spawn(async move {
            while let Some(detection) = detection_rx.recv().await {
                println!("{}", report::render_detection(&detection, output));
            }
        });

        // --- Idle-source sweeper ---
        let sweeper = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    let evicted = engine.sweep();
                    if evicted > 0 {
                        debug!(evicted, "swept idle sources");
                    }
                }
            })
        };

        // --- Capture feed ---
        let mut feed = tokio::spawn(run_capture(capture, pipeline.handle()));
        let mut feed_finished = false;

        // --- Wait for EOF or a signal ---
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
            tokio::select! {
                result = &mut feed => {
                    feed_finished = true;
                    match result {
                        Ok(overflows) => info!(overflows, "capture feed finished"),
                        Err(e) => warn!(error = %e, "capture task failed"),
                    }
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    feed.abort();
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, shutting down");
                    feed.abort();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = &mut feed => {
                    feed_finished = true;
                    match result {
                        Ok(overflows) => info!(overflows, "capture feed finished"),
                        Err(e) => warn!(error = %e, "capture task failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                    feed.abort();
                }
            }
        }

        // Make sure the feed task (and its ingest handle) is gone before
        // draining, then let every accepted event finish.
        if !feed_finished {
            let _ = feed.await;
        }
        pipeline.shutdown().await;
        sweeper.abort();

        // Workers are done, so the detection channel is closed; let the
        // printer flush whatever is buffered.
        let _ = printer.await;

        let stats = engine.stats();
        info!(
            ingested = stats.events_ingested,
            dropped = stats.events_dropped,
            emitted = stats.detections_emitted,
            suppressed = stats.detections_suppressed,
            "engine stopped"
        );

        let summary = engine.summary();
        println!("{}", report::render_summary(&summary, self.output));
        Ok(summary)
    }
}

/// Pump the capture feed into the pipeline, retrying on queue overflow.
///
/// Returns the number of overflow events encountered.
async fn run_capture<C: Capture>(mut capture: C, handle: IngestHandle) -> u64 {
    let mut overflows = 0u64;
    loop {
        let raw = match capture.next_observation().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "capture feed error, stopping");
                break;
            }
        };

        loop {
            match handle.submit(raw.clone()).await {
                Ok(()) => break,
                Err(EngineError::IngestionOverflow) => {
                    // Recoverable: back off and retry the same event so the
                    // feed stays lossless under pressure.
                    overflows += 1;
                    warn!(overflows, "ingestion queue full, backing off");
                    tokio::time::sleep(OVERFLOW_BACKOFF).await;
                }
                Err(e) => {
                    warn!(error = %e, "submission refused, stopping capture");
                    return overflows;
                }
            }
        }
    }
    overflows
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture::JsonLinesCapture;

    fn feed_line(src: &str, port: i64, ts: i64) -> String {
        format!(
            "{{\"source_identity\":\"{src}\",\"destination_port\":{port},\"timestamp_ms\":{ts}}}"
        )
    }

    #[tokio::test]
    async fn run_processes_feed_to_completion() {
        let mut lines = Vec::new();
        // ssh knock from one host...
        for (i, port) in [7000i64, 8000, 9000].iter().enumerate() {
            lines.push(feed_line("192.168.1.100", *port, 1_000 + 500 * i as i64));
        }
        // ...and an SPA packet from another.
        lines.push(feed_line("172.16.0.25", 62_201, 2_000));
        let feed = lines.join("\n").into_bytes();

        let daemon = Daemon::new(
            EngineSettings::default(),
            OutputMode::Text { color: false },
        );
        let summary = daemon
            .run(JsonLinesCapture::new(std::io::Cursor::new(feed)))
            .await
            .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.count(knocksentry_core::Severity::High), 1);
        assert_eq!(summary.count(knocksentry_core::Severity::Medium), 1);
    }

    #[tokio::test]
    async fn run_survives_invalid_events() {
        let lines = vec![
            feed_line("a", 7000, 1_000),
            feed_line("a", 70_000, 1_100), // dropped by the normalizer
            feed_line("a", 8000, 1_200),
            feed_line("a", 9000, 1_300),
        ];
        let feed = lines.join("\n").into_bytes();

        let daemon = Daemon::new(EngineSettings::default(), OutputMode::Json);
        let summary = daemon
            .run(JsonLinesCapture::new(std::io::Cursor::new(feed)))
            .await
            .unwrap();

        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn run_rejects_invalid_configuration() {
        let daemon = Daemon::new(
            EngineSettings {
                window_ms: -1,
                ..Default::default()
            },
            OutputMode::Json,
        );
        let result = daemon
            .run(JsonLinesCapture::new(std::io::Cursor::new(Vec::new())))
            .await;
        assert!(result.is_err());
    }
}
