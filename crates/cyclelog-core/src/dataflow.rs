//! Sink and source contracts, plus in-memory implementations.
//!
//! At the end of every cycle the orchestrator hands one [`Snapshot`] to
//! each registered [`Sink`], in registration order. During replay a
//! [`Source`] refills the live table at the start of every cycle; returning
//! `false` from [`Source::refill`] ends the run cleanly.
//!
//! [`MemorySink`] and [`MemorySource`] keep everything in process, which is
//! enough to record a run and immediately replay it (and is what the tests
//! use).

use std::collections::VecDeque;
use std::sync::Arc;

use cyclelog_types::{LogTable, Snapshot};
use parking_lot::Mutex;

/// Errors a sink can raise. Any error from [`Sink::receive`] aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing the snapshot failed.
    #[error("sink I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded.
    #[error("failed to encode snapshot: {message}")]
    Encode {
        /// Description of the encoding failure.
        message: String,
    },

    /// The downstream consumer went away.
    #[error("sink disconnected: {reason}")]
    Disconnected {
        /// Why the consumer is gone.
        reason: String,
    },

    /// The sink refused the snapshot.
    #[error("snapshot rejected: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },
}

/// Errors a source can raise. Exhaustion is not an error.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Reading the recording failed.
    #[error("source I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A recorded entry could not be decoded.
    #[error("failed to decode recording at entry {entry}: {message}")]
    Decode {
        /// 1-based index of the offending entry.
        entry: u64,
        /// Description of the decoding failure.
        message: String,
    },

    /// The recording is structurally invalid.
    #[error("corrupt recording: {message}")]
    Corrupt {
        /// Description of what is wrong.
        message: String,
    },
}

/// A consumer of per-cycle snapshots (file writer, network publisher, viewer).
pub trait Sink: Send {
    /// Name used in diagnostics and in [`LoggerError::SinkAborted`].
    ///
    /// [`LoggerError::SinkAborted`]: crate::logger::LoggerError::SinkAborted
    fn name(&self) -> &str {
        "sink"
    }

    /// Called once when the run starts, before the first cycle.
    fn start(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called once when the run stops.
    fn stop(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Accept the snapshot of one cycle.
    ///
    /// Called synchronously from `end_cycle`. The snapshot is independently
    /// owned; clone it to process it later or on another thread.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn receive(&mut self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

/// A provider of previously recorded cycles.
pub trait Source: Send {
    /// Called once when the run starts.
    fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Called once when the run stops.
    fn stop(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Overwrite `table` with the next recorded cycle's values and
    /// timestamp. Returns `false` when the recording is exhausted.
    fn refill(&mut self, table: &mut LogTable) -> Result<bool, SourceError>;
}

/// A sink that keeps every snapshot in memory.
///
/// Clones share storage: register one clone with the logger and keep
/// another to inspect what was received.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    received: Arc<Mutex<Vec<Snapshot>>>,
    label: Option<Arc<str>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sink reported under `name`.
    pub fn named(name: &str) -> Self {
        Self {
            received: Arc::default(),
            label: Some(Arc::from(name)),
        }
    }

    /// Every snapshot received so far, in order.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.received.lock().clone()
    }

    /// Number of snapshots received so far.
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    /// Whether nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    /// Turn what was recorded into a source that replays it.
    pub fn to_source(&self) -> MemorySource {
        MemorySource::new(self.snapshots())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        self.label.as_deref().unwrap_or("memory")
    }

    fn receive(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.received.lock().push(snapshot.clone());
        Ok(())
    }
}

/// A source that replays a fixed list of snapshots in order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    remaining: VecDeque<Snapshot>,
}

impl MemorySource {
    /// Create a source that will replay `snapshots` in order.
    pub fn new(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        Self {
            remaining: snapshots.into_iter().collect(),
        }
    }

    /// Build a source from plain tables.
    pub fn from_tables(tables: impl IntoIterator<Item = LogTable>) -> Self {
        Self::new(tables.into_iter().map(Snapshot::from))
    }

    /// Number of cycles left to replay.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl Source for MemorySource {
    fn refill(&mut self, table: &mut LogTable) -> Result<bool, SourceError> {
        let Some(next) = self.remaining.pop_front() else {
            return Ok(false);
        };
        table.set_timestamp(next.timestamp());
        table.merge_from(next.table());
        Ok(true)
    }
}
