//! Connection events and their normalization.
//!
//! A capture backend hands over [`RawObservation`]s exactly as they came off
//! the wire; [`normalize`] turns them into validated [`ConnectionEvent`]s or
//! rejects them. Everything past the normalizer can rely on the fields being
//! well-formed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Severity of a detection, ordered by urgency.
///
/// The derived ordering follows priority: `Critical` sorts first (priority 1),
/// `Info` last (priority 5). Serialized uppercase (`"CRITICAL"`, ...) to match
/// the pattern-catalog config format and JSON output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Immediate action recommended.
    Critical,
    /// Likely requires attention.
    High,
    /// Worth reviewing.
    Medium,
    /// Logged, unlikely to need intervention.
    Low,
    /// Informational only.
    Info,
}

impl Severity {
    /// Fixed priority rank, 1 highest.
    pub fn priority(self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observation as delivered by a capture backend, before validation.
///
/// The port is deliberately wider than `u16` so that out-of-range values
/// survive deserialization and are rejected by [`normalize`] with a proper
/// [`EngineError::InvalidEvent`] instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    /// Opaque source identity, typically an IP address.
    pub source_identity: String,
    /// Destination port as observed; validated to 0..=65535.
    pub destination_port: i64,
    /// Event time in epoch milliseconds. Not assumed monotonic per source.
    pub timestamp_ms: i64,
}

/// A validated, immutable connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub source_identity: String,
    pub destination_port: u16,
    pub timestamp_ms: i64,
}

/// Validate a raw observation into a [`ConnectionEvent`].
///
/// Rejects an empty (or whitespace-only) source identity and a port outside
/// 0..=65535. A rejected event is dropped by the caller; it never affects the
/// engine's lifecycle or other sources.
pub fn normalize(raw: RawObservation) -> Result<ConnectionEvent, EngineError> {
    if raw.source_identity.trim().is_empty() {
        return Err(EngineError::InvalidEvent(
            "empty source identity".to_string(),
        ));
    }
    let destination_port = u16::try_from(raw.destination_port).map_err(|_| {
        EngineError::InvalidEvent(format!(
            "destination port {} out of range 0..=65535",
            raw.destination_port
        ))
    })?;

    Ok(ConnectionEvent {
        source_identity: raw.source_identity,
        destination_port,
        timestamp_ms: raw.timestamp_ms,
    })
}
