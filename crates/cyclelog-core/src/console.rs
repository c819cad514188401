//! Console capture: tee textual output into the log.
//!
//! [`ConsoleCapture`] hands out [`ConsoleWriter`]s for stdout and stderr.
//! Every byte written through them goes to the real destination and, while
//! a [`CaptureGuard`] is held, into one shared buffer. Both streams share
//! the buffer so cross-stream ordering is preserved. Writers implement
//! [`std::io::Write`] and tracing-subscriber's [`MakeWriter`], so a
//! `tracing` subscriber can log straight into the capture.
//!
//! Once per cycle the orchestrator calls [`ConsoleCapture::drain`], which
//! returns exactly the bytes appended since the previous drain, or `None`
//! for a silent cycle. With partial-line retention enabled, an unterminated
//! trailing line stays in the buffer and is published together with the
//! text that completes it.
//!
//! Only text written through these writers, or through a `tracing`
//! subscriber built on them, is captured. `println!`, `eprintln!` and other
//! direct writes to the process streams bypass the capture.
//!
//! When capture is released at the end of a run, a retained unterminated
//! line that was never completed is discarded; it has already been echoed
//! to the real console.
//!
//! Forwarding to the real console is best-effort: a failed write there is
//! ignored and never reaches the cycle.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::ConsoleConfig;

/// Output key of the captured console text, inside the outputs table.
pub const CONSOLE_KEY: &str = "Console";

/// Which real stream a [`ConsoleWriter`] forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Process standard output.
    Stdout,
    /// Process standard error.
    Stderr,
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    /// Whether a [`CaptureGuard`] currently holds the capture.
    active: bool,
    /// Bytes written since the last drain, including any retained tail.
    pending: Vec<u8>,
}

/// Shared console capture. Clones refer to the same buffer.
#[derive(Debug, Clone)]
pub struct ConsoleCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    echo: bool,
    retain_partial_lines: bool,
}

impl ConsoleCapture {
    /// Create a capture from configuration. Nothing is captured until
    /// [`acquire`](Self::acquire) is called.
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(CaptureBuffer::default())),
            echo: config.echo,
            retain_partial_lines: config.retain_partial_lines,
        }
    }

    /// Writer that forwards to stdout.
    pub fn stdout(&self) -> ConsoleWriter {
        self.writer(Stream::Stdout)
    }

    /// Writer that forwards to stderr.
    pub fn stderr(&self) -> ConsoleWriter {
        self.writer(Stream::Stderr)
    }

    fn writer(&self, stream: Stream) -> ConsoleWriter {
        ConsoleWriter {
            buffer: Arc::clone(&self.buffer),
            stream,
            echo: self.echo,
        }
    }

    /// Start capturing. Capture ends when the returned guard is dropped.
    ///
    /// Any text left over from a previous capture is discarded.
    pub fn acquire(&self) -> CaptureGuard {
        let mut buffer = self.buffer.lock();
        buffer.active = true;
        buffer.pending.clear();
        CaptureGuard {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Whether a guard currently holds the capture.
    pub fn is_active(&self) -> bool {
        self.buffer.lock().active
    }

    /// Number of captured bytes not yet published by a drain.
    pub fn unpublished_len(&self) -> usize {
        self.buffer.lock().pending.len()
    }

    /// Extract the text appended since the previous drain.
    ///
    /// Returns `None` when there is nothing to publish. An incomplete UTF-8
    /// sequence at the end is always held back; an unterminated line is
    /// held back as well when partial-line retention is enabled.
    pub fn drain(&self) -> Option<String> {
        let mut buffer = self.buffer.lock();
        let boundary = publish_boundary(&buffer.pending, self.retain_partial_lines);
        if boundary == 0 {
            return None;
        }
        let published: Vec<u8> = buffer.pending.drain(..boundary).collect();
        Some(String::from_utf8_lossy(&published).into_owned())
    }
}

impl Default for ConsoleCapture {
    fn default() -> Self {
        Self::new(&ConsoleConfig::default())
    }
}

/// Number of leading bytes of `pending` that may be published now.
fn publish_boundary(pending: &[u8], retain_partial_lines: bool) -> usize {
    let candidate = if retain_partial_lines {
        pending
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |idx| idx.saturating_add(1))
    } else {
        pending.len()
    };

    let Some(head) = pending.get(..candidate) else {
        return 0;
    };
    match std::str::from_utf8(head) {
        // An error without `error_len` is a sequence cut off at the end.
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        _ => candidate,
    }
}

/// Holds console capture active. Dropping it stops capturing and discards
/// any text that was never drained.
#[derive(Debug)]
pub struct CaptureGuard {
    buffer: Arc<Mutex<CaptureBuffer>>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let mut buffer = self.buffer.lock();
        buffer.active = false;
        buffer.pending.clear();
    }
}

/// Writer that tees into the real console and the capture buffer.
#[derive(Debug, Clone)]
pub struct ConsoleWriter {
    buffer: Arc<Mutex<CaptureBuffer>>,
    stream: Stream,
    echo: bool,
}

impl ConsoleWriter {
    /// The real stream this writer forwards to.
    pub const fn stream(&self) -> Stream {
        self.stream
    }
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Forward and append under one lock so both destinations see the
        // same order across threads.
        let mut buffer = self.buffer.lock();
        if self.echo {
            let _ = match self.stream {
                Stream::Stdout => io::stdout().lock().write_all(buf),
                Stream::Stderr => io::stderr().lock().write_all(buf),
            };
        }
        if buffer.active {
            buffer.pending.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.echo {
            let _ = match self.stream {
                Stream::Stdout => io::stdout().flush(),
                Stream::Stderr => io::stderr().flush(),
            };
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
