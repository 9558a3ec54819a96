//! Detections, the append-only detection log, and summary statistics.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::Severity;

/// A single emitted detection. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Source identity the detection is attributed to.
    pub src: String,
    /// Id of the matched pattern (or `unknown_sequence` for the fallback).
    pub pattern_id: String,
    /// Description copied from the pattern at match time.
    pub description: String,
    pub severity: Severity,
    /// Ordered ports that triggered the match.
    pub ports: Vec<u16>,
    /// Wall-clock time the detection was produced.
    pub detected_at: DateTime<Utc>,
}

/// Append-only, process-lifetime record of emitted detections.
///
/// Appends come from many source partitions concurrently; reads take a
/// point-in-time snapshot so iteration never observes a half-finished append
/// and later appends never appear mid-iteration.
#[derive(Debug, Default)]
pub struct DetectionLog {
    inner: RwLock<Vec<Detection>>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, detection: Detection) {
        self.inner
            .write()
            .expect("detection log lock poisoned")
            .push(detection);
    }

    /// Snapshot of all detections present at call time, in append order.
    pub fn snapshot(&self) -> Vec<Detection> {
        self.inner
            .read()
            .expect("detection log lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("detection log lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Severity-bucketed counts over a set of detections.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl DetectionSummary {
    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Recompute the summary from scratch. Pure; there is no incremental state
/// to drift out of sync.
pub fn summarize(detections: &[Detection]) -> DetectionSummary {
    let mut by_severity = BTreeMap::new();
    for detection in detections {
        *by_severity.entry(detection.severity).or_insert(0) += 1;
    }
    DetectionSummary {
        total: detections.len(),
        by_severity,
    }
}
