//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of a record-and-replay session
//! so `main` can propagate with `?`.

use cyclelog_core::config::ConfigError;
use cyclelog_core::dataflow::{SinkError, SourceError};
use cyclelog_core::logger::LoggerError;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The logger failed to start, dispatch, or stop.
    #[error("logger error: {source}")]
    Logger {
        /// The underlying logger error.
        #[from]
        source: LoggerError,
    },

    /// The recording file could not be created.
    #[error("recording error: {source}")]
    Recording {
        /// The underlying sink error.
        #[from]
        source: SinkError,
    },

    /// The recording file could not be opened for replay.
    #[error("replay error: {source}")]
    Replay {
        /// The underlying source error.
        #[from]
        source: SourceError,
    },

    /// The viewer task panicked or was cancelled.
    #[error("viewer task failed: {message}")]
    Viewer {
        /// Description of the failure.
        message: String,
    },

    /// Replayed outputs differ from the recorded ones.
    #[error("replay diverged in {count} place(s), first: {first}")]
    Diverged {
        /// Number of differing outputs.
        count: usize,
        /// Description of the first difference.
        first: String,
    },
}
