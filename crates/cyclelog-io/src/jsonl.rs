//! JSON Lines recordings.
//!
//! A recording is a text file with one JSON object per line. The first line
//! is a header carrying the schema version and creation time; every
//! following line carries one cycle's snapshot:
//!
//! ```text
//! {"type":"header","schema_version":1,"created_at_ms":1760000000000}
//! {"type":"cycle","seq":1,"table":{"timestamp":{...},"entries":{...},"tables":[...]}}
//! ```
//!
//! [`JsonLinesSink`] writes this format and [`JsonLinesSource`] replays it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use cyclelog_core::dataflow::{Sink, SinkError, Source, SourceError};
use cyclelog_types::{LogTable, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Version written into the header line. Recordings with a newer version
/// are rejected.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    Header {
        schema_version: u32,
        created_at_ms: i64,
    },
    Cycle {
        seq: u64,
        table: Snapshot,
    },
}

/// Sink that appends one JSON line per snapshot.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    label: String,
    header_written: bool,
    written: u64,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create (or truncate) the recording file at `path`.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        let mut sink = Self::new(BufWriter::new(file));
        sink.label = format!("jsonl:{}", path.display());
        Ok(sink)
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap an arbitrary writer. The header is written on `start`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            label: String::from("jsonl"),
            header_written: false,
            written: 0,
        }
    }

    /// Number of snapshots written so far.
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &Line) -> Result<(), SinkError> {
        let json = serde_json::to_string(line).map_err(|e| SinkError::Encode {
            message: e.to_string(),
        })?;
        writeln!(self.writer, "{json}")?;
        Ok(())
    }

    fn ensure_header(&mut self) -> Result<(), SinkError> {
        if self.header_written {
            return Ok(());
        }
        self.write_line(&Line::Header {
            schema_version: SCHEMA_VERSION,
            created_at_ms: Utc::now().timestamp_millis(),
        })?;
        self.header_written = true;
        debug!(sink = %self.label, "Recording header written");
        Ok(())
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<(), SinkError> {
        self.ensure_header()
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        debug!(sink = %self.label, cycles = self.written, "Recording flushed");
        Ok(())
    }

    fn receive(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.ensure_header()?;
        let seq = self.written.saturating_add(1);
        self.write_line(&Line::Cycle {
            seq,
            table: snapshot.clone(),
        })?;
        self.written = seq;
        Ok(())
    }
}

/// Source that replays a recording written by [`JsonLinesSink`].
#[derive(Debug)]
pub struct JsonLinesSource<R: BufRead + Send> {
    reader: R,
    line_no: u64,
    header: Option<(u32, i64)>,
    last_seq: u64,
    buf: String,
}

impl JsonLinesSource<BufReader<File>> {
    /// Open the recording at `path`.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Send> JsonLinesSource<R> {
    /// Wrap an arbitrary reader positioned at the start of a recording.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            header: None,
            last_seq: 0,
            buf: String::new(),
        }
    }

    /// Schema version from the header, once it has been read.
    pub fn schema_version(&self) -> Option<u32> {
        self.header.map(|(version, _)| version)
    }

    /// Creation time from the header, in Unix milliseconds.
    pub fn created_at_ms(&self) -> Option<i64> {
        self.header.map(|(_, created)| created)
    }

    /// Sequence number of the last cycle replayed, zero before the first.
    pub const fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Next non-blank line, decoded. `None` at end of input.
    fn next_line(&mut self) -> Result<Option<Line>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no = self.line_no.saturating_add(1);
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text)
                .map(Some)
                .map_err(|e| SourceError::Decode {
                    entry: self.line_no,
                    message: e.to_string(),
                });
        }
    }

    fn read_header(&mut self) -> Result<(), SourceError> {
        if self.header.is_some() {
            return Ok(());
        }
        match self.next_line()? {
            Some(Line::Header {
                schema_version,
                created_at_ms,
            }) => {
                if schema_version > SCHEMA_VERSION {
                    return Err(SourceError::Corrupt {
                        message: format!(
                            "unsupported schema version {schema_version} (newest known is {SCHEMA_VERSION})"
                        ),
                    });
                }
                self.header = Some((schema_version, created_at_ms));
                debug!(schema_version, created_at_ms, "Recording header read");
                Ok(())
            }
            Some(Line::Cycle { .. }) => Err(SourceError::Corrupt {
                message: String::from("header must be the first line"),
            }),
            None => Err(SourceError::Corrupt {
                message: String::from("missing header"),
            }),
        }
    }
}

impl<R: BufRead + Send> Source for JsonLinesSource<R> {
    fn start(&mut self) -> Result<(), SourceError> {
        self.read_header()
    }

    fn refill(&mut self, table: &mut LogTable) -> Result<bool, SourceError> {
        self.read_header()?;
        match self.next_line()? {
            None => Ok(false),
            Some(Line::Cycle { seq, table: recorded }) => {
                self.last_seq = seq;
                table.set_timestamp(recorded.timestamp());
                table.merge_from(recorded.table());
                Ok(true)
            }
            Some(Line::Header { .. }) => Err(SourceError::Corrupt {
                message: format!("unexpected header at line {}", self.line_no),
            }),
        }
    }
}
