//! Bounded ingestion pipeline between capture feeds and the engine.
//!
//! Producers submit observations through an [`IngestHandle`]; a bounded
//! channel applies backpressure, and a small pool of worker tasks drives
//! [`Engine::ingest`]. Per-source atomicity is the engine's job, so workers
//! can pull concurrently without coordination.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use knocksentry_core::config::EngineSettings;
use knocksentry_core::{Detection, Engine, EngineError, EngineState, RawObservation};

/// Worker tasks pulling from the queue. Parallelism across sources; a single
/// source is still serialized inside the engine.
const WORKER_COUNT: usize = 4;

/// Producer-side handle: checks engine state and enqueues with a timeout.
#[derive(Clone)]
pub struct IngestHandle {
    engine: Arc<Engine>,
    tx: mpsc::Sender<RawObservation>,
    enqueue_timeout: Duration,
}

impl IngestHandle {
    /// Submit an observation for processing.
    ///
    /// Blocks (asynchronously) while the queue is full, up to the configured
    /// enqueue timeout; then fails with [`EngineError::IngestionOverflow`] so
    /// the producer can back off and retry instead of losing the event.
    /// Fails with [`EngineError::EngineStopped`] once draining has begun.
    pub async fn submit(&self, raw: RawObservation) -> Result<(), EngineError> {
        if self.engine.state() != EngineState::Running {
            return Err(EngineError::EngineStopped);
        }
        match self.tx.send_timeout(raw, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(EngineError::IngestionOverflow),
            Err(SendTimeoutError::Closed(_)) => Err(EngineError::EngineStopped),
        }
    }
}

/// The running pipeline: queue plus worker pool.
pub struct Pipeline {
    engine: Arc<Engine>,
    tx: mpsc::Sender<RawObservation>,
    enqueue_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the worker pool. Detections produced by the engine are forwarded
    /// over `detection_tx` for live reporting.
    pub fn start(
        engine: Arc<Engine>,
        settings: &EngineSettings,
        detection_tx: mpsc::Sender<Detection>,
    ) -> Self {
        Self::start_with_workers(engine, settings, detection_tx, WORKER_COUNT)
    }

    fn start_with_workers(
        engine: Arc<Engine>,
        settings: &EngineSettings,
        detection_tx: mpsc::Sender<Detection>,
        worker_count: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<RawObservation>(settings.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let rx = Arc::clone(&rx);
                let detection_tx = detection_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let raw = { rx.lock().await.recv().await };
                        let Some(raw) = raw else { break };
                        match engine.ingest(raw) {
                            Ok(Some(detection)) => {
                                if detection_tx.send(detection).await.is_err() {
                                    debug!("no reporting consumer for detection");
                                }
                            }
                            Ok(None) => {}
                            Err(EngineError::InvalidEvent(reason)) => {
                                warn!(%reason, "dropped invalid event");
                            }
                            Err(e) => {
                                warn!(error = %e, "event rejected by engine");
                            }
                        }
                    }
                })
            })
            .collect();

        Self {
            engine,
            tx,
            enqueue_timeout: Duration::from_millis(settings.enqueue_timeout_ms),
            workers,
        }
    }

    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            engine: Arc::clone(&self.engine),
            tx: self.tx.clone(),
            enqueue_timeout: self.enqueue_timeout,
        }
    }

    /// Drain and stop: refuse new submissions, let workers finish every
    /// already-accepted event, then move the engine to `Stopped`.
    ///
    /// Any producer-side [`IngestHandle`] clones must be dropped (or their
    /// tasks aborted) before this resolves, since workers run until the last
    /// sender is gone.
    pub async fn shutdown(self) {
        self.engine.begin_drain();
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "pipeline worker panicked");
            }
        }
        self.engine.stop();
        debug!("ingestion pipeline drained and stopped");
    }
}
