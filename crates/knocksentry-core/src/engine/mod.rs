//! Engine orchestration: normalize -> store -> match -> log, per event.
//!
//! The engine owns all mutable detection state. State is partitioned by
//! source identity into a fixed set of shards, each behind its own lock, so
//! events for independent sources proceed in parallel while everything about
//! one source -- window update, pattern evaluation, cooldown check, log
//! append -- happens atomically under that source's shard lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::config::EngineSettings;
use crate::detection::{self, Detection, DetectionLog, DetectionSummary};
use crate::error::EngineError;
use crate::event::{self, RawObservation};
use crate::matcher;
use crate::pattern::KnockPattern;
use crate::store::SequenceStore;

/// Number of source-identity shards. Contention exists only among events for
/// sources that hash to the same shard.
const SHARD_COUNT: usize = 16;

/// Engine lifecycle.
///
/// Construction is the INIT phase: configuration is validated in
/// [`Engine::new`] and a successfully built engine starts in `Running`.
/// `Draining` still lets already-accepted events finish their pipeline; the
/// ingestion boundary in front of the engine stops accepting new work when
/// draining begins. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Draining,
    Stopped,
}

const STATE_RUNNING: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Lifetime counters, readable at any point.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Events that passed validation and entered a window.
    pub events_ingested: u64,
    /// Events rejected by the normalizer and dropped.
    pub events_dropped: u64,
    /// Detections appended to the log.
    pub detections_emitted: u64,
    /// Matches suppressed by the re-alert cooldown.
    pub detections_suppressed: u64,
    /// Sources currently holding a window.
    pub active_sources: usize,
}

/// The sequence-detection engine.
pub struct Engine {
    catalog: Vec<KnockPattern>,
    shards: Vec<Mutex<SequenceStore>>,
    log: DetectionLog,
    state: AtomicU8,
    /// Newest event timestamp observed across all sources; drives [`sweep`](Self::sweep).
    latest_ts: AtomicI64,
    events_ingested: AtomicU64,
    events_dropped: AtomicU64,
    detections_emitted: AtomicU64,
    detections_suppressed: AtomicU64,
}

impl Engine {
    /// Validate configuration and build an engine in the `Running` state.
    ///
    /// Fails with [`EngineError::InvalidConfiguration`] before any event is
    /// processed: non-positive window, malformed catalog.
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        let catalog = settings.catalog();
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(SequenceStore::new(settings.window_ms)))
            .collect();

        Ok(Self {
            catalog,
            shards,
            log: DetectionLog::new(),
            state: AtomicU8::new(STATE_RUNNING),
            latest_ts: AtomicI64::new(i64::MIN),
            events_ingested: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            detections_emitted: AtomicU64::new(0),
            detections_suppressed: AtomicU64::new(0),
        })
    }

    /// Process one observation through the full pipeline, returning the
    /// detection it produced, if any.
    ///
    /// Callable from many threads at once; per-source atomicity is guaranteed
    /// by the shard lock. Accepted in `Running` and `Draining` (draining
    /// exists precisely to let accepted events finish); fails with
    /// [`EngineError::EngineStopped`] once stopped and with
    /// [`EngineError::InvalidEvent`] for malformed observations, which are
    /// counted and isolated from other sources.
    pub fn ingest(&self, raw: RawObservation) -> Result<Option<Detection>, EngineError> {
        if self.state() == EngineState::Stopped {
            return Err(EngineError::EngineStopped);
        }

        let event = match event::normalize(raw) {
            Ok(event) => event,
            Err(err) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        self.events_ingested.fetch_add(1, Ordering::Relaxed);
        self.latest_ts.fetch_max(event.timestamp_ms, Ordering::Relaxed);

        let src = event.source_identity.clone();
        let mut store = self
            .shard_for(&src)
            .lock()
            .expect("engine shard lock poisoned");

        let Some(window) = store.record(event) else {
            return Ok(None);
        };

        match matcher::evaluate(&src, &window.ports(), &self.catalog) {
            Some(detection) => {
                if window.already_fired(&detection.pattern_id) {
                    self.detections_suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        src = %detection.src,
                        pattern = %detection.pattern_id,
                        "detection suppressed by cooldown"
                    );
                    Ok(None)
                } else {
                    window.mark_fired(detection.pattern_id.clone());
                    // Still under the shard lock: the append is part of the
                    // per-source atomic step.
                    self.log.append(detection.clone());
                    self.detections_emitted.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(detection))
                }
            }
            None => Ok(None),
        }
    }

    /// Prune every source window against the newest timestamp seen and evict
    /// emptied ones. Call periodically so idle sources release memory.
    ///
    /// Returns the number of sources evicted.
    pub fn sweep(&self) -> usize {
        let latest = self.latest_ts.load(Ordering::Relaxed);
        if latest == i64::MIN {
            return 0;
        }
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .expect("engine shard lock poisoned")
                    .sweep(latest)
            })
            .sum()
    }

    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => EngineState::Running,
            STATE_DRAINING => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }

    /// Move `Running -> Draining`. The ingestion boundary must stop
    /// submitting new work; in-flight events complete normally.
    pub fn begin_drain(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_DRAINING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Terminal transition. Subsequent `ingest` calls fail.
    pub fn stop(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
    }

    /// Snapshot of all detections emitted so far, in append order.
    pub fn detections(&self) -> Vec<Detection> {
        self.log.snapshot()
    }

    /// Severity-bucketed counts over the current detection log.
    pub fn summary(&self) -> DetectionSummary {
        detection::summarize(&self.log.snapshot())
    }

    pub fn stats(&self) -> EngineStats {
        let active_sources = self
            .shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .expect("engine shard lock poisoned")
                    .source_count()
            })
            .sum();
        EngineStats {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            detections_emitted: self.detections_emitted.load(Ordering::Relaxed),
            detections_suppressed: self.detections_suppressed.load(Ordering::Relaxed),
            active_sources,
        }
    }

    fn shard_for(&self, src: &str) -> &Mutex<SequenceStore> {
        let mut hasher = DefaultHasher::new();
        src.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;

    fn engine() -> Engine {
        Engine::new(&EngineSettings::default()).unwrap()
    }

    fn raw(src: &str, port: i64, ts: i64) -> RawObservation {
        RawObservation {
            source_identity: src.to_string(),
            destination_port: port,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        let settings = EngineSettings {
            window_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::new(&settings),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn knock_sequence_fires_once() {
        let engine = engine();
        assert!(engine.ingest(raw("1.2.3.4", 7000, 1_000)).unwrap().is_none());
        assert!(engine.ingest(raw("1.2.3.4", 8000, 2_000)).unwrap().is_none());
        let detection = engine.ingest(raw("1.2.3.4", 9000, 3_000)).unwrap().unwrap();
        assert_eq!(detection.pattern_id, "ssh_unlock");
        assert_eq!(detection.severity, Severity::High);
        assert_eq!(detection.ports, vec![7000, 8000, 9000]);
        assert_eq!(engine.detections().len(), 1);
    }

    #[test]
    fn cooldown_suppresses_refire_until_window_empties() {
        let engine = engine();
        // A single SPA packet fires immediately...
        assert!(engine.ingest(raw("a", 62_201, 1_000)).unwrap().is_some());
        // ...and sustained repeats inside the same fill cycle stay quiet.
        assert!(engine.ingest(raw("a", 62_201, 1_100)).unwrap().is_none());
        assert!(engine.ingest(raw("a", 62_201, 1_200)).unwrap().is_none());
        assert_eq!(engine.detections().len(), 1);
        assert_eq!(engine.stats().detections_suppressed, 2);

        // Idle long enough for the window to drain, then knock again:
        // a fresh fill cycle re-alerts.
        let detection = engine.ingest(raw("a", 62_201, 60_000)).unwrap();
        assert!(detection.is_some());
        assert_eq!(engine.detections().len(), 2);
    }

    #[test]
    fn sustained_burst_escalates_through_distinct_patterns() {
        // The cooldown is per (source, pattern): a burst that keeps growing
        // can still escalate to patterns that have not fired yet.
        let engine = engine();
        engine.ingest(raw("a", 7000, 1_000)).unwrap();
        engine.ingest(raw("a", 8000, 1_100)).unwrap();
        let first = engine.ingest(raw("a", 9000, 1_200)).unwrap().unwrap();
        assert_eq!(first.pattern_id, "ssh_unlock");

        // Fourth event: the suffix no longer matches, the 3-event threshold
        // takes over.
        let second = engine.ingest(raw("a", 1234, 1_300)).unwrap().unwrap();
        assert_eq!(second.pattern_id, "basic_3port");

        // Fifth event escalates to the 5-event threshold.
        let third = engine.ingest(raw("a", 5678, 1_400)).unwrap().unwrap();
        assert_eq!(third.pattern_id, "complex_5port");

        // Sixth event: everything matching has already fired this cycle.
        assert!(engine.ingest(raw("a", 9012, 1_500)).unwrap().is_none());
        assert_eq!(engine.detections().len(), 3);
    }

    #[test]
    fn invalid_event_is_counted_and_isolated() {
        let engine = engine();
        engine.ingest(raw("a", 7000, 1_000)).unwrap();

        let err = engine.ingest(raw("a", 70_000, 1_100)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvent(_)));
        assert!(matches!(
            engine.ingest(raw("", 80, 1_100)).unwrap_err(),
            EngineError::InvalidEvent(_)
        ));

        // The source's valid events are unaffected.
        engine.ingest(raw("a", 8000, 1_200)).unwrap();
        let detection = engine.ingest(raw("a", 9000, 1_300)).unwrap().unwrap();
        assert_eq!(detection.pattern_id, "ssh_unlock");

        let stats = engine.stats();
        assert_eq!(stats.events_dropped, 2);
        assert_eq!(stats.events_ingested, 3);
    }

    #[test]
    fn ingest_fails_after_stop() {
        let engine = engine();
        engine.ingest(raw("a", 7000, 1_000)).unwrap();
        engine.begin_drain();
        assert_eq!(engine.state(), EngineState::Draining);
        // Draining still admits events the boundary already accepted.
        engine.ingest(raw("a", 8000, 1_100)).unwrap();

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(
            engine.ingest(raw("a", 9000, 1_200)),
            Err(EngineError::EngineStopped)
        ));
    }

    #[test]
    fn sources_do_not_interfere() {
        let engine = engine();
        engine.ingest(raw("a", 7000, 1_000)).unwrap();
        engine.ingest(raw("a", 8000, 1_100)).unwrap();
        // A different source finishing the same knock gets nothing.
        assert!(engine.ingest(raw("b", 9000, 1_200)).unwrap().is_none());
        // The original source still completes.
        assert!(engine.ingest(raw("a", 9000, 1_300)).unwrap().is_some());
    }

    #[test]
    fn sweep_evicts_idle_sources() {
        let engine = engine();
        engine.ingest(raw("idle", 7000, 1_000)).unwrap();
        engine.ingest(raw("live", 8000, 50_000)).unwrap();
        assert_eq!(engine.stats().active_sources, 2);

        let evicted = engine.sweep();
        assert_eq!(evicted, 1);
        assert_eq!(engine.stats().active_sources, 1);
    }

    #[test]
    fn sweep_before_any_event_is_noop() {
        let engine = engine();
        assert_eq!(engine.sweep(), 0);
    }

    #[test]
    fn summary_reflects_log() {
        let engine = engine();
        for (i, port) in [7000, 8000, 9000].iter().enumerate() {
            engine.ingest(raw("a", *port as i64, 1_000 + i as i64)).unwrap();
        }
        engine.ingest(raw("b", 62_201, 1_000)).unwrap();

        let summary = engine.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.count(Severity::High), 1);
        assert_eq!(summary.count(Severity::Medium), 1);
    }

    #[test]
    fn concurrent_sources_match_sequential_outcome() {
        use std::sync::Arc;

        let engine = Arc::new(engine());
        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                let src = format!("10.0.0.{i}");
                for (j, port) in [7000i64, 8000, 9000].iter().enumerate() {
                    engine
                        .ingest(raw(&src, *port, 1_000 + j as i64))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one ssh_unlock detection per source, no duplicates lost or
        // doubled by concurrency.
        let detections = engine.detections();
        assert_eq!(detections.len(), 8);
        assert!(detections.iter().all(|d| d.pattern_id == "ssh_unlock"));
        let mut sources: Vec<&str> = detections.iter().map(|d| d.src.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        assert_eq!(sources.len(), 8);
    }

    #[test]
    fn concurrent_events_for_one_source_fire_exactly_once() {
        use std::sync::Arc;

        // Many threads hammering the same source with the same knock: the
        // per-source lock must serialize evaluation so the pattern fires
        // exactly once for the fill cycle.
        let engine = Arc::new(engine());
        engine.ingest(raw("a", 7000, 1_000)).unwrap();
        engine.ingest(raw("a", 8000, 1_100)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                engine.ingest(raw("a", 9000, 1_200)).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let detections = engine.detections();
        let ssh: Vec<_> = detections
            .iter()
            .filter(|d| d.pattern_id == "ssh_unlock")
            .collect();
        assert_eq!(ssh.len(), 1);
    }
}
