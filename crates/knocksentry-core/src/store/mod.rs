//! Per-source sliding windows of connection events.
//!
//! The [`SequenceStore`] owns one [`SourceWindow`] per source identity,
//! created lazily on first event and evicted as soon as it prunes empty, so
//! idle sources do not accumulate. Events are kept in timestamp order;
//! arrival order is not trusted.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::event::ConnectionEvent;

/// Ordered window of recent events for one source, plus the re-alert
/// cooldown markers for patterns that already fired on this fill cycle.
#[derive(Debug, Default)]
pub struct SourceWindow {
    events: VecDeque<ConnectionEvent>,
    latest_seen: i64,
    fired: HashSet<String>,
}

impl SourceWindow {
    /// Ordered destination ports currently in the window.
    pub fn ports(&self) -> Vec<u16> {
        self.events.iter().map(|e| e.destination_port).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the given pattern already fired for this fill cycle.
    pub fn already_fired(&self, pattern_id: &str) -> bool {
        self.fired.contains(pattern_id)
    }

    /// Suppress further detections of this pattern until the window empties.
    pub fn mark_fired(&mut self, pattern_id: String) {
        self.fired.insert(pattern_id);
    }

    /// Drop every event older than `cutoff`. Events are timestamp-sorted, so
    /// popping from the front is a complete prune.
    fn prune(&mut self, cutoff: i64) {
        while let Some(front) = self.events.front() {
            if front.timestamp_ms < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
        if self.events.is_empty() {
            // Window fully emptied: the next fill cycle may re-alert.
            self.fired.clear();
        }
    }

    /// Insert keeping timestamp order. `push_back` when the event is in
    /// order (the common case); otherwise walk back to the insertion point.
    /// Equal timestamps keep arrival order, so duplicate knocks are retained
    /// as separate events.
    fn insert(&mut self, event: ConnectionEvent) {
        let pos = self
            .events
            .iter()
            .rposition(|e| e.timestamp_ms <= event.timestamp_ms)
            .map(|i| i + 1)
            .unwrap_or(0);
        if pos == self.events.len() {
            self.events.push_back(event);
        } else {
            self.events.insert(pos, event);
        }
    }
}

/// Owns every source window. Not synchronized; the engine wraps stores in
/// per-shard locks so that all access to a given source is serialized.
#[derive(Debug)]
pub struct SequenceStore {
    window_ms: i64,
    windows: HashMap<String, SourceWindow>,
}

impl SequenceStore {
    /// `window_ms` is validated positive at configuration time.
    pub fn new(window_ms: i64) -> Self {
        debug_assert!(window_ms > 0);
        Self {
            window_ms,
            windows: HashMap::new(),
        }
    }

    /// Insert an event into its source's window, prune, and return the window
    /// for immediate evaluation.
    ///
    /// Returns `None` when the source ends up with no retained events (the
    /// event itself was already older than the cutoff) -- the source is then
    /// evicted entirely.
    pub fn record(&mut self, event: ConnectionEvent) -> Option<&mut SourceWindow> {
        let source = event.source_identity.clone();
        let window = self.windows.entry(source.clone()).or_default();

        window.latest_seen = window.latest_seen.max(event.timestamp_ms);
        let cutoff = window.latest_seen - self.window_ms;

        window.prune(cutoff);
        if event.timestamp_ms >= cutoff {
            window.insert(event);
        }

        if window.is_empty() {
            self.windows.remove(&source);
            return None;
        }
        self.windows.get_mut(&source)
    }

    /// Prune every window against the newest timestamp the engine has seen
    /// and evict the ones that empty. Called periodically so sources that go
    /// silent release their memory; per-event pruning only runs when a source
    /// sends again.
    ///
    /// Returns the number of sources evicted.
    pub fn sweep(&mut self, latest_ms: i64) -> usize {
        let window_ms = self.window_ms;
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            let cutoff = window.latest_seen.max(latest_ms) - window_ms;
            window.prune(cutoff);
            !window.is_empty()
        });
        before - self.windows.len()
    }

    /// Number of sources currently tracked.
    pub fn source_count(&self) -> usize {
        self.windows.len()
    }
}
