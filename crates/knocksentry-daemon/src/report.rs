//! Detection and summary rendering.
//!
//! Two output modes: human-readable text (optionally severity-colored when
//! stdout is a terminal) and one JSON object per line for machine consumers.

use knocksentry_core::{Detection, DetectionSummary, Severity};

/// How detections and the final summary are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text { color: bool },
    Json,
}

/// ANSI color for a severity tag.
fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "\x1b[1;31m", // bold red
        Severity::High => "\x1b[31m",       // red
        Severity::Medium => "\x1b[33m",     // yellow
        Severity::Low => "\x1b[36m",        // cyan
        Severity::Info => "\x1b[2m",        // dim
    }
}

const RESET: &str = "\x1b[0m";

/// Render one detection according to the output mode.
pub fn render_detection(detection: &Detection, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            serde_json::to_string(detection).expect("detection serializes")
        }
        OutputMode::Text { color } => {
            let trail = detection
                .ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            let tag = if color {
                format!(
                    "{}[{}]{}",
                    severity_color(detection.severity),
                    detection.severity,
                    RESET
                )
            } else {
                format!("[{}]", detection.severity)
            };
            format!(
                "{tag}  {}  src={}  {trail}",
                detection.description, detection.src
            )
        }
    }
}

/// Render the terminal summary report.
pub fn render_summary(summary: &DetectionSummary, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::json!({
            "total": summary.total,
            "CRITICAL": summary.count(Severity::Critical),
            "HIGH": summary.count(Severity::High),
            "MEDIUM": summary.count(Severity::Medium),
            "LOW": summary.count(Severity::Low),
        })
        .to_string(),
        OutputMode::Text { .. } => format!(
            "--- knock detection summary ---\n\
             total:    {}\n\
             CRITICAL: {}\n\
             HIGH:     {}\n\
             MEDIUM:   {}\n\
             LOW:      {}",
            summary.total,
            summary.count(Severity::Critical),
            summary.count(Severity::High),
            summary.count(Severity::Medium),
            summary.count(Severity::Low),
        ),
    }
}
