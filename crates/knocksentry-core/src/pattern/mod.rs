//! Knock pattern catalog.
//!
//! A [`KnockPattern`] describes one recognizable knock: either an exact
//! ordered port sequence or a bare event-count threshold. Patterns are
//! evaluated in declaration order, so catalog order is the priority order.
//! Ships with a built-in catalog; deployments extend or replace it via
//! `[[pattern]]` entries in the config file.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::event::Severity;

/// Pattern id used for the generic fallback detection when no configured
/// pattern matches but the window holds enough events to look like a knock.
pub const UNKNOWN_SEQUENCE_ID: &str = "unknown_sequence";

/// Minimum window size before the generic fallback fires.
pub const UNKNOWN_SEQUENCE_MIN_EVENTS: usize = 3;

/// How a pattern matches a source's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchSpec {
    /// The last `ports.len()` ports of the window must equal `ports` exactly,
    /// in order. A contiguous suffix, not a subsequence: decoy traffic
    /// interleaved between the real knock ports defeats the match.
    ExactSequence { ports: Vec<u16> },
    /// The window must hold at least `min_count` events; ports unconstrained.
    CountThreshold { min_count: usize },
}

/// A configured knock pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnockPattern {
    /// Unique identifier, reported on detections.
    pub id: String,
    /// Human-readable description, copied onto detections.
    pub description: String,
    /// Severity assigned to detections of this pattern.
    pub severity: Severity,
    /// Match rule.
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
}

/// The default catalog. Exact-sequence patterns come first so specific
/// matches take priority over the coarse count thresholds.
pub fn builtin_catalog() -> Vec<KnockPattern> {
    vec![
        KnockPattern {
            id: "ssh_unlock".into(),
            description: "Classic SSH port-knock unlock sequence".into(),
            severity: Severity::High,
            match_spec: MatchSpec::ExactSequence {
                ports: vec![7000, 8000, 9000],
            },
        },
        KnockPattern {
            id: "fwknop_spa".into(),
            description: "fwknop single-packet authorization port".into(),
            severity: Severity::Medium,
            match_spec: MatchSpec::ExactSequence {
                ports: vec![62201],
            },
        },
        KnockPattern {
            id: "complex_5port".into(),
            description: "High-volume multi-port knock".into(),
            severity: Severity::High,
            match_spec: MatchSpec::CountThreshold { min_count: 5 },
        },
        KnockPattern {
            id: "basic_3port".into(),
            description: "Basic multi-port knock".into(),
            severity: Severity::Medium,
            match_spec: MatchSpec::CountThreshold { min_count: 3 },
        },
    ]
}

/// Validate a catalog at startup: ids unique and non-empty, match specs
/// non-degenerate. Runs once in engine construction, never per event.
pub fn validate_catalog(catalog: &[KnockPattern]) -> Result<(), EngineError> {
    let mut seen = std::collections::HashSet::new();
    for pattern in catalog {
        if pattern.id.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "pattern with empty id".to_string(),
            ));
        }
        if pattern.id == UNKNOWN_SEQUENCE_ID {
            return Err(EngineError::InvalidConfiguration(format!(
                "pattern id `{UNKNOWN_SEQUENCE_ID}` is reserved for the generic fallback"
            )));
        }
        if !seen.insert(pattern.id.as_str()) {
            return Err(EngineError::InvalidConfiguration(format!(
                "duplicate pattern id `{}`",
                pattern.id
            )));
        }
        match &pattern.match_spec {
            MatchSpec::ExactSequence { ports } if ports.is_empty() => {
                return Err(EngineError::InvalidConfiguration(format!(
                    "pattern `{}` has an empty port sequence",
                    pattern.id
                )));
            }
            MatchSpec::CountThreshold { min_count } if *min_count == 0 => {
                return Err(EngineError::InvalidConfiguration(format!(
                    "pattern `{}` has a zero count threshold",
                    pattern.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
