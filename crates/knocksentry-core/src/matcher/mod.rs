//! Window-against-catalog pattern evaluation.
//!
//! [`evaluate`] is a pure function of the source, its current window, and the
//! pattern catalog: no hidden state, same inputs always produce the same
//! verdict. The engine decides separately whether a verdict is suppressed by
//! the re-alert cooldown.

use chrono::Utc;

use crate::detection::Detection;
use crate::event::Severity;
use crate::pattern::{
    KnockPattern, MatchSpec, UNKNOWN_SEQUENCE_ID, UNKNOWN_SEQUENCE_MIN_EVENTS,
};

/// Evaluate a source's window against the catalog, in catalog order.
///
/// The first satisfied pattern wins and at most one detection is produced.
/// An `ExactSequence` matches when the window's port trail ends with the
/// required ports, contiguously and in order; a `CountThreshold` matches on
/// window size alone. When nothing configured matches but the window holds at
/// least [`UNKNOWN_SEQUENCE_MIN_EVENTS`] events, a generic
/// `unknown_sequence` detection is produced at MEDIUM severity.
pub fn evaluate(src: &str, ports: &[u16], catalog: &[KnockPattern]) -> Option<Detection> {
    for pattern in catalog {
        match &pattern.match_spec {
            MatchSpec::ExactSequence { ports: required } => {
                if !required.is_empty() && ports.ends_with(required) {
                    return Some(Detection {
                        src: src.to_string(),
                        pattern_id: pattern.id.clone(),
                        description: pattern.description.clone(),
                        severity: pattern.severity,
                        ports: required.clone(),
                        detected_at: Utc::now(),
                    });
                }
            }
            MatchSpec::CountThreshold { min_count } => {
                if ports.len() >= *min_count {
                    return Some(Detection {
                        src: src.to_string(),
                        pattern_id: pattern.id.clone(),
                        description: pattern.description.clone(),
                        severity: pattern.severity,
                        ports: ports.to_vec(),
                        detected_at: Utc::now(),
                    });
                }
            }
        }
    }

    if ports.len() >= UNKNOWN_SEQUENCE_MIN_EVENTS {
        return Some(Detection {
            src: src.to_string(),
            pattern_id: UNKNOWN_SEQUENCE_ID.to_string(),
            description: format!("Unrecognized knock sequence of {} ports", ports.len()),
            severity: Severity::Medium,
            ports: ports.to_vec(),
            detected_at: Utc::now(),
        });
    }

    None
}
