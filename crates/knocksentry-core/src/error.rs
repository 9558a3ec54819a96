//! Error types for the detection engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup-time configuration problem. Fatal: the engine refuses to start.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A single malformed observation. Recoverable: the event is dropped and
    /// counted, other sources are unaffected.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The bounded ingestion queue stayed full past the enqueue timeout.
    /// Recoverable: the producer should back off and retry.
    #[error("ingestion queue full, event not accepted")]
    IngestionOverflow,

    /// Ingestion was attempted after shutdown. Terminal caller error.
    #[error("engine is stopped")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, EngineError>;
