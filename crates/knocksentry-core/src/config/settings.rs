//! Engine settings and TOML configuration parsing.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::pattern::{self, KnockPattern};

/// Top-level knocksentry configuration, loaded from a TOML file.
///
/// Every field has a default, so an empty or missing file yields a working
/// configuration with the built-in pattern catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Sliding window length in milliseconds. Must be positive.
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Capacity of the bounded ingestion queue between capture and engine.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a producer waits for queue space before the enqueue fails
    /// with an overflow.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Knock pattern catalog, in evaluation order. Empty means "use the
    /// built-in catalog".
    #[serde(default, rename = "pattern")]
    pub patterns: Vec<KnockPattern>,
}

fn default_window_ms() -> i64 {
    5_000
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            patterns: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file at the given path.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: EngineSettings = toml::from_str(&contents)?;
        Ok(settings)
    }

    /// The effective pattern catalog: configured patterns, or the built-in
    /// catalog when none are configured.
    pub fn catalog(&self) -> Vec<KnockPattern> {
        if self.patterns.is_empty() {
            pattern::builtin_catalog()
        } else {
            self.patterns.clone()
        }
    }

    /// Validate the whole configuration. Called once at engine construction;
    /// a failure here aborts startup before any event is processed.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_ms <= 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "window_ms must be positive, got {}",
                self.window_ms
            )));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfiguration(
                "queue_capacity must be positive".to_string(),
            ));
        }
        pattern::validate_catalog(&self.catalog())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;
    use crate::pattern::MatchSpec;

    #[test]
    fn defaults_use_builtin_catalog() {
        let settings = EngineSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.window_ms, 5_000);
        assert_eq!(settings.catalog().len(), 4);
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let settings: EngineSettings = toml::from_str("").unwrap();
        assert_eq!(settings.window_ms, 5_000);
        assert_eq!(settings.queue_capacity, 1_024);
        assert!(settings.patterns.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
window_ms = 10000
queue_capacity = 64
enqueue_timeout_ms = 250

[[pattern]]
id = "vpn_unlock"
description = "VPN gateway knock"
severity = "CRITICAL"
match = { type = "exact_sequence", ports = [1194, 500, 4500] }

[[pattern]]
id = "noisy"
description = "Many knocks"
severity = "LOW"
match = { type = "count_threshold", min_count = 8 }
"#;
        let settings: EngineSettings = toml::from_str(toml_str).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.window_ms, 10_000);
        assert_eq!(settings.queue_capacity, 64);
        assert_eq!(settings.patterns.len(), 2);
        assert_eq!(settings.patterns[0].severity, Severity::Critical);
        assert_eq!(
            settings.patterns[1].match_spec,
            MatchSpec::CountThreshold { min_count: 8 }
        );
        // Configured catalog replaces the built-in one.
        assert_eq!(settings.catalog().len(), 2);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings.window_ms, 5_000);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "window_ms = 2500\n").unwrap();
        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings.window_ms, 2_500);
    }

    #[test]
    fn nonpositive_window_rejected() {
        let settings = EngineSettings {
            window_ms: 0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));

        let settings = EngineSettings {
            window_ms: -5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let settings = EngineSettings {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
