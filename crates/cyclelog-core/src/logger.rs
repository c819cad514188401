//! The cycle orchestrator.
//!
//! [`CycleLogger`] owns one [`LogTable`] per run and drives it through every
//! cycle of the host's control loop:
//!
//! 1. [`begin_cycle`](CycleLogger::begin_cycle): with a replay source
//!    registered, the source refills the table; otherwise the root timestamp
//!    is stamped with the time elapsed since the run started.
//! 2. User code: components pass through [`process`](CycleLogger::process),
//!    which writes them to the table while recording and restores them from
//!    the table while replaying. Derived values go through
//!    [`output`](CycleLogger::output).
//! 3. [`end_cycle`](CycleLogger::end_cycle): captured console text and cycle
//!    timings are written, the table is snapshotted, and the snapshot is
//!    handed to every sink in registration order.
//!
//! The control code never needs to know which mode is active.
//!
//! # Table layout
//!
//! | Region | Contents |
//! |--------|----------|
//! | `RealMetadata` / `ReplayMetadata` | User metadata, `RunMode`, `RunId`, `RunStartedAt` |
//! | `LogMetadata` | Signal-to-key mappings |
//! | `RealOutputs` / `ReplayOutputs` | User outputs and `Console` |
//! | `<outputs>/LoggerTimings` | `TableReadNS`, `UserCodeNS`, `FullCycleNS`, `LoggerCycleNS` |
//!
//! Calls made while no run is active are silent no-ops.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use cyclelog_types::{LogEnum, LogTable, Snapshot, Subtable, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LoggerConfig;
use crate::console::{CONSOLE_KEY, CaptureGuard, ConsoleCapture};
use crate::dataflow::{Sink, SinkError, Source, SourceError};
use crate::inputs::Loggable;

/// Metadata region written while recording.
pub const REAL_METADATA: &str = "RealMetadata";
/// Metadata region written while replaying.
pub const REPLAY_METADATA: &str = "ReplayMetadata";
/// Output region written while recording.
pub const REAL_OUTPUTS: &str = "RealOutputs";
/// Output region written while replaying.
pub const REPLAY_OUTPUTS: &str = "ReplayOutputs";
/// Region holding the signal-to-key mappings.
pub const LOG_METADATA: &str = "LogMetadata";
/// Timing subtable inside the active output region.
pub const TIMINGS: &str = "LoggerTimings";

/// Time spent refilling (replay) or stamping (recording) the table at the
/// start of the cycle.
pub const TABLE_READ_NS: &str = "TableReadNS";
/// Time spent between `begin_cycle` and `end_cycle`.
pub const USER_CODE_NS: &str = "UserCodeNS";
/// Time spent on the whole cycle up to the snapshot.
pub const FULL_CYCLE_NS: &str = "FullCycleNS";
/// Full cycle time minus user code time.
pub const LOGGER_CYCLE_NS: &str = "LoggerCycleNS";

/// Metadata key holding the run mode.
pub const RUN_MODE_KEY: &str = "RunMode";
/// Metadata key holding the run's UUID.
pub const RUN_ID_KEY: &str = "RunId";
/// Metadata key holding the run's wall-clock start (RFC 3339).
pub const RUN_STARTED_AT_KEY: &str = "RunStartedAt";

/// Whether the current run captures live state or replays a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Components are written to the table from live state.
    Recording,
    /// Components are restored from a replay source.
    Replaying,
}

impl RunMode {
    /// Name stored under [`RUN_MODE_KEY`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "Recording",
            Self::Replaying => "Replaying",
        }
    }

    /// Metadata region for this mode.
    pub const fn metadata_table(self) -> &'static str {
        match self {
            Self::Recording => REAL_METADATA,
            Self::Replaying => REPLAY_METADATA,
        }
    }

    /// Output region for this mode.
    pub const fn outputs_table(self) -> &'static str {
        match self {
            Self::Recording => REAL_OUTPUTS,
            Self::Replaying => REPLAY_OUTPUTS,
        }
    }
}

/// Outcome of [`CycleLogger::begin_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStart {
    /// The table is ready; run user code and call `end_cycle`.
    Ready,
    /// The replay source ran out. The run has been stopped cleanly.
    Exhausted,
    /// No run is active.
    NotRunning,
}

impl CycleStart {
    /// Whether user code should run this cycle.
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A sink failed to start. The run was not started.
    #[error("sink '{sink}' failed to start: {source}")]
    SinkStart {
        /// Name of the failing sink.
        sink: String,
        /// The underlying sink error.
        source: SinkError,
    },

    /// A sink rejected a snapshot. The run has been aborted.
    #[error("sink '{sink}' aborted the run: {source}")]
    SinkAborted {
        /// Name of the failing sink.
        sink: String,
        /// The underlying sink error.
        source: SinkError,
    },

    /// A sink failed to stop cleanly.
    #[error("sink '{sink}' failed to stop: {source}")]
    SinkStop {
        /// Name of the failing sink.
        sink: String,
        /// The underlying sink error.
        source: SinkError,
    },

    /// The replay source failed. The run has been aborted.
    #[error("replay source error: {source}")]
    Source {
        /// The underlying source error.
        #[from]
        source: SourceError,
    },
}

/// State that only exists between `start` and `stop`.
#[derive(Debug)]
struct Run {
    table: LogTable,
    mode: RunMode,
    id: Uuid,
    started_at: Instant,
    cycle_started: Instant,
    user_started: Instant,
    last_timestamp: Option<Duration>,
    cycles: u64,
    /// Held for the lifetime of the run; dropping it releases capture.
    _capture: Option<CaptureGuard>,
}

/// Record/replay orchestrator for one control program.
///
/// Register sinks, an optional replay source, and metadata, then call
/// [`start`](Self::start). Registration is per run: [`stop`](Self::stop)
/// clears it so the logger can be configured afresh.
pub struct CycleLogger {
    config: LoggerConfig,
    console: ConsoleCapture,
    sinks: Vec<Box<dyn Sink>>,
    source: Option<Box<dyn Source>>,
    metadata: BTreeMap<String, String>,
    signal_keys: BTreeMap<String, String>,
    run: Option<Run>,
}

impl CycleLogger {
    /// Create a logger with its own console capture.
    pub fn new(config: LoggerConfig) -> Self {
        let console = ConsoleCapture::new(&config.console);
        Self::with_console(config, console)
    }

    /// Create a logger that drains an existing console capture, for example
    /// one whose writer was already installed as the tracing output.
    pub fn with_console(config: LoggerConfig, console: ConsoleCapture) -> Self {
        Self {
            metadata: config.metadata.clone(),
            signal_keys: config.signal_keys.clone(),
            config,
            console,
            sinks: Vec::new(),
            source: None,
            run: None,
        }
    }

    // -----------------------------------------------------------------------
    // Registration (ignored while running)
    // -----------------------------------------------------------------------

    /// Register a sink. Sinks receive snapshots in registration order.
    pub fn add_sink(&mut self, sink: impl Sink + 'static) {
        if self.is_running() {
            debug!(sink = sink.name(), "Ignoring sink registration while running");
            return;
        }
        self.sinks.push(Box::new(sink));
    }

    /// Register the replay source. With a source the next run replays.
    pub fn set_source(&mut self, source: impl Source + 'static) {
        if self.is_running() {
            debug!("Ignoring source registration while running");
            return;
        }
        self.source = Some(Box::new(source));
    }

    /// Add a metadata pair written into the metadata region at start.
    pub fn add_metadata(&mut self, key: &str, value: &str) {
        if self.is_running() {
            debug!(key, "Ignoring metadata while running");
            return;
        }
        self.metadata.insert(key.to_owned(), value.to_owned());
    }

    /// Map a well-known signal name (for example `EnabledKey`) to the table
    /// key that carries it, written into [`LOG_METADATA`] at start.
    pub fn set_signal_key(&mut self, signal: &str, key: &str) {
        if self.is_running() {
            debug!(signal, "Ignoring signal key while running");
            return;
        }
        self.signal_keys.insert(signal.to_owned(), key.to_owned());
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Whether a replay source is registered.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Whether a run is active.
    pub const fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Mode of the active run.
    pub fn mode(&self) -> Option<RunMode> {
        self.run.as_ref().map(|run| run.mode)
    }

    /// UUID of the active run.
    pub fn run_id(&self) -> Option<Uuid> {
        self.run.as_ref().map(|run| run.id)
    }

    /// Cycles completed in the active run.
    pub fn cycles(&self) -> u64 {
        self.run.as_ref().map_or(0, |run| run.cycles)
    }

    /// Number of registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// The console capture drained into the `Console` output.
    pub const fn console(&self) -> &ConsoleCapture {
        &self.console
    }

    /// Current cycle timestamp, or zero when no run is active.
    pub fn timestamp(&self) -> Duration {
        self.run
            .as_ref()
            .map_or(Duration::ZERO, |run| run.table.timestamp())
    }

    /// The live table of the active run.
    pub fn table(&self) -> Option<&LogTable> {
        self.run.as_ref().map(|run| &run.table)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start a run.
    ///
    /// Writes run metadata, acquires console capture, then starts every
    /// sink in registration order and finally the source. If anything fails
    /// to start, whatever was started is stopped again and the logger stays
    /// stopped. Calling `start` on a running logger does nothing.
    pub fn start(&mut self) -> Result<(), LoggerError> {
        if self.is_running() {
            return Ok(());
        }

        let mode = if self.has_source() {
            RunMode::Replaying
        } else {
            RunMode::Recording
        };
        let id = Uuid::now_v7();

        let mut table = LogTable::new();
        {
            let mut metadata = table.subtable(mode.metadata_table());
            for (key, value) in &self.metadata {
                metadata.put(key, value.as_str());
            }
            metadata.put(RUN_MODE_KEY, mode.as_str());
            metadata.put(RUN_ID_KEY, id.to_string());
            metadata.put(RUN_STARTED_AT_KEY, Utc::now().to_rfc3339());
        }
        if !self.signal_keys.is_empty() {
            let mut log_metadata = table.subtable(LOG_METADATA);
            for (signal, key) in &self.signal_keys {
                log_metadata.put(signal, key.as_str());
            }
        }

        let capture = self.config.console.enabled.then(|| self.console.acquire());

        for started in 0..self.sinks.len() {
            let Some(sink) = self.sinks.get_mut(started) else {
                break;
            };
            if let Err(source) = sink.start() {
                let sink = sink.name().to_owned();
                warn!(sink = %sink, error = %source, "Sink failed to start");
                self.stop_sinks(started);
                return Err(LoggerError::SinkStart { sink, source });
            }
        }

        if let Some(replay) = self.source.as_mut() {
            if let Err(err) = replay.start() {
                warn!(error = %err, "Replay source failed to start");
                self.stop_sinks(self.sinks.len());
                return Err(err.into());
            }
        }

        let now = Instant::now();
        self.run = Some(Run {
            table,
            mode,
            id,
            started_at: now,
            cycle_started: now,
            user_started: now,
            last_timestamp: None,
            cycles: 0,
            _capture: capture,
        });

        info!(
            mode = mode.as_str(),
            run_id = %id,
            sinks = self.sinks.len(),
            console_capture = self.config.console.enabled,
            "Run started"
        );
        Ok(())
    }

    /// Prepare the table for a new cycle.
    ///
    /// Replaying: the source refills the table. When it is exhausted the run
    /// is stopped and [`CycleStart::Exhausted`] is returned. A source error
    /// aborts the run.
    ///
    /// Recording: the root timestamp is set to the time since start, and is
    /// always strictly greater than the previous cycle's.
    ///
    /// Either way the time this step took is written to `TableReadNS`.
    pub fn begin_cycle(&mut self) -> Result<CycleStart, LoggerError> {
        let Some(run) = self.run.as_mut() else {
            return Ok(CycleStart::NotRunning);
        };
        let cycle_started = Instant::now();

        if let Some(replay) = self.source.as_mut() {
            match replay.refill(&mut run.table) {
                Ok(true) => {}
                Ok(false) => {
                    info!(cycles = run.cycles, "Replay source exhausted, ending run");
                    self.stop()?;
                    return Ok(CycleStart::Exhausted);
                }
                Err(err) => {
                    warn!(error = %err, "Replay source failed, aborting run");
                    self.abort();
                    return Err(err.into());
                }
            }
        } else {
            let mut timestamp = run.started_at.elapsed();
            if let Some(last) = run.last_timestamp {
                if timestamp <= last {
                    timestamp = last.saturating_add(Duration::from_nanos(1));
                }
            }
            run.table.set_timestamp(timestamp);
        }

        let read = cycle_started.elapsed();
        run.table
            .subtable(run.mode.outputs_table())
            .subtable(TIMINGS)
            .put(TABLE_READ_NS, nanos(read));
        run.last_timestamp = Some(run.table.timestamp());
        run.cycle_started = cycle_started;
        run.user_started = Instant::now();
        Ok(CycleStart::Ready)
    }

    /// Pass a component through the table under `name`.
    ///
    /// Recording writes the component into the table; replaying overwrites
    /// the component with the recorded values.
    pub fn process(&mut self, name: &str, component: &mut impl Loggable) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let mode = run.mode;
        let mut table = run.table.subtable(name);
        match mode {
            RunMode::Recording => component.write_to(&mut table),
            RunMode::Replaying => component.read_from(&mut table),
        }
    }

    /// Record a derived value under `key` in the active output region.
    /// Outputs are written in both modes and never read back.
    pub fn output(&mut self, key: &str, value: impl Into<Value>) {
        if let Some(mut outputs) = self.outputs() {
            outputs.put(key, value);
        }
    }

    /// Record an enumeration output by variant name.
    pub fn output_enum<E: LogEnum>(&mut self, key: &str, value: E) {
        if let Some(mut outputs) = self.outputs() {
            outputs.put_enum(key, value);
        }
    }

    /// Record a whole component as outputs under `name`.
    pub fn output_component(&mut self, name: &str, component: &impl Loggable) {
        if let Some(mut outputs) = self.outputs() {
            component.write_to(&mut outputs.subtable(name));
        }
    }

    /// The active output region, for nested outputs.
    pub fn outputs(&mut self) -> Option<Subtable<'_>> {
        let run = self.run.as_mut()?;
        let region = run.mode.outputs_table();
        Some(run.table.subtable(region))
    }

    /// Finish the cycle: merge console text, record timings, snapshot the
    /// table, and dispatch the snapshot to every sink in order.
    ///
    /// If a sink fails, the run is aborted and
    /// [`LoggerError::SinkAborted`] is returned.
    pub fn end_cycle(&mut self) -> Result<(), LoggerError> {
        let Some(run) = self.run.as_mut() else {
            return Ok(());
        };
        let user = run.user_started.elapsed();
        let region = run.mode.outputs_table();

        let mut printed = false;
        if self.config.console.enabled {
            if let Some(text) = self.console.drain() {
                run.table.subtable(region).put(CONSOLE_KEY, text);
                printed = true;
            }
        }

        let full = run.cycle_started.elapsed();
        {
            let mut outputs = run.table.subtable(region);
            let mut timings = outputs.subtable(TIMINGS);
            timings.put(USER_CODE_NS, nanos(user));
            timings.put(FULL_CYCLE_NS, nanos(full));
            timings.put(LOGGER_CYCLE_NS, nanos(full.saturating_sub(user)));
        }

        // A silent cycle publishes no console text, even though the live
        // table still holds the last cycle's.
        let console_key = format!("/{region}/{CONSOLE_KEY}");
        let snapshot = if !printed && run.table.value(&console_key).is_some() {
            let mut quiet = run.table.clone();
            quiet.remove(&console_key);
            Snapshot::from(quiet)
        } else {
            run.table.snapshot()
        };
        run.cycles = run.cycles.saturating_add(1);

        let mut failure = None;
        for sink in &mut self.sinks {
            if let Err(source) = sink.receive(&snapshot) {
                failure = Some((sink.name().to_owned(), source));
                break;
            }
        }

        if let Some((sink, source)) = failure {
            warn!(sink = %sink, error = %source, "Sink failed, aborting run");
            self.abort();
            return Err(LoggerError::SinkAborted { sink, source });
        }
        Ok(())
    }

    /// Run one full cycle around `user_code`. User code only runs when the
    /// cycle is [`CycleStart::Ready`].
    pub fn run_cycle<F>(&mut self, user_code: F) -> Result<CycleStart, LoggerError>
    where
        F: FnOnce(&mut Self),
    {
        let start = self.begin_cycle()?;
        if start.is_ready() {
            user_code(self);
            self.end_cycle()?;
        }
        Ok(start)
    }

    /// Stop the run.
    ///
    /// Stops every sink, then the source, then releases console capture.
    /// Console text still held back as an unterminated line is discarded.
    /// Every collaborator is stopped even if an earlier one fails; the first
    /// failure is returned. Registration is reset to the configured
    /// metadata with no sinks and no source.
    pub fn stop(&mut self) -> Result<(), LoggerError> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(source) = sink.stop() {
                warn!(sink = sink.name(), error = %source, "Sink failed to stop");
                if first_error.is_none() {
                    first_error = Some(LoggerError::SinkStop {
                        sink: sink.name().to_owned(),
                        source,
                    });
                }
            }
        }
        if let Some(replay) = self.source.as_mut() {
            if let Err(err) = replay.stop() {
                warn!(error = %err, "Replay source failed to stop");
                if first_error.is_none() {
                    first_error = Some(err.into());
                }
            }
        }

        let (mode, id, cycles) = (run.mode, run.id, run.cycles);
        let unpublished = self.console.unpublished_len();
        drop(run);
        if unpublished > 0 {
            debug!(bytes = unpublished, "Discarded unterminated console text");
        }

        self.sinks.clear();
        self.source = None;
        self.metadata.clone_from(&self.config.metadata);
        self.signal_keys.clone_from(&self.config.signal_keys);

        info!(mode = mode.as_str(), run_id = %id, cycles, "Run stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Stop the run, logging instead of returning stop failures.
    fn abort(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "Error while aborting run");
        }
    }

    /// Stop the first `count` sinks after a failed start.
    fn stop_sinks(&mut self, count: usize) {
        for sink in self.sinks.iter_mut().take(count) {
            if let Err(err) = sink.stop() {
                warn!(sink = sink.name(), error = %err, "Sink failed to stop");
            }
        }
    }
}

impl Default for CycleLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl Drop for CycleLogger {
    fn drop(&mut self) {
        if self.is_running() {
            self.abort();
        }
    }
}

impl std::fmt::Debug for CycleLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleLogger")
            .field("sinks", &self.sinks.len())
            .field("has_source", &self.source.is_some())
            .field("metadata", &self.metadata)
            .field("signal_keys", &self.signal_keys)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

/// Whole nanoseconds of `duration`, saturating at `i64::MAX`.
fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataflow::{MemorySink, MemorySource};

    fn quiet_config() -> LoggerConfig {
        let mut config = LoggerConfig::default();
        config.console.echo = false;
        config
    }

    #[test]
    fn mode_follows_source_registration() {
        let mut logger = CycleLogger::new(quiet_config());
        logger.start().unwrap();
        assert_eq!(logger.mode(), Some(RunMode::Recording));
        logger.stop().unwrap();

        logger.set_source(MemorySource::default());
        logger.start().unwrap();
        assert_eq!(logger.mode(), Some(RunMode::Replaying));
        logger.stop().unwrap();
        assert!(!logger.has_source());
    }

    #[test]
    fn nanos_saturates() {
        assert_eq!(nanos(Duration::from_nanos(12)), 12);
        assert_eq!(nanos(Duration::MAX), i64::MAX);
    }

    #[test]
    fn recording_timestamps_strictly_increase() {
        let mut logger = CycleLogger::new(quiet_config());
        let sink = MemorySink::new();
        logger.add_sink(sink.clone());
        logger.start().unwrap();
        for _ in 0..20 {
            logger.run_cycle(|_| {}).unwrap();
        }
        logger.stop().unwrap();

        let stamps: Vec<_> = sink.snapshots().iter().map(|s| s.timestamp()).collect();
        assert_eq!(stamps.len(), 20);
        assert!(stamps.windows(2).all(|pair| pair.first() < pair.get(1)));
    }

    #[test]
    fn timestamp_is_zero_when_stopped() {
        let logger = CycleLogger::new(quiet_config());
        assert_eq!(logger.timestamp(), Duration::ZERO);
        assert!(logger.table().is_none());
        assert_eq!(logger.cycles(), 0);
    }
}
