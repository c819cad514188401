//! Forward snapshots to an async consumer.
//!
//! The cycle thread must never wait on a viewer, so [`ChannelSink`] uses an
//! unbounded tokio channel: `receive` only enqueues the snapshot's `Arc`.
//! When the receiving half is dropped the sink reports
//! [`SinkError::Disconnected`], which aborts the run.

use cyclelog_core::dataflow::{Sink, SinkError};
use cyclelog_types::Snapshot;
use tokio::sync::mpsc;

/// Sink that sends every snapshot down a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    label: String,
    tx: mpsc::UnboundedSender<Snapshot>,
}

impl ChannelSink {
    /// Create a sink and the receiver its snapshots arrive on.
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: name.to_owned(),
                tx,
            },
            rx,
        )
    }

    /// Wrap an existing sender.
    pub fn from_sender(name: &str, tx: mpsc::UnboundedSender<Snapshot>) -> Self {
        Self {
            label: name.to_owned(),
            tx,
        }
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.label
    }

    fn receive(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.tx
            .send(snapshot.clone())
            .map_err(|err| SinkError::Disconnected {
                reason: err.to_string(),
            })
    }
}
