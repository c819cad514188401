//! Integration tests for the cycle orchestrator.
//!
//! Every test drives a [`CycleLogger`] through whole runs with in-memory
//! sinks and sources and inspects the snapshots the sinks received.

#![allow(clippy::unwrap_used, clippy::float_cmp, clippy::panic, clippy::indexing_slicing)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use cyclelog_core::config::LoggerConfig;
use cyclelog_core::dataflow::{MemorySink, MemorySource, Sink, SinkError, Source, SourceError};
use cyclelog_core::inputs::{FieldSet, Logged};
use cyclelog_core::logger::{
    CycleLogger, CycleStart, FULL_CYCLE_NS, LOG_METADATA, LOGGER_CYCLE_NS, LoggerError,
    REAL_METADATA, REAL_OUTPUTS, REPLAY_METADATA, REPLAY_OUTPUTS, RUN_ID_KEY, RUN_MODE_KEY,
    RUN_STARTED_AT_KEY, TABLE_READ_NS, TIMINGS, USER_CODE_NS,
};
use cyclelog_core::timer::CycleTimer;
use cyclelog_types::{LogTable, Snapshot, Value};
use parking_lot::Mutex;

cyclelog_types::log_enum! {
    enum Phase {
        Idle,
        Moving,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Inputs {
    x: i32,
    speed: f64,
}

fn input_fields() -> FieldSet<Inputs> {
    FieldSet::new()
        .field("x", |i: &Inputs| &i.x, |i| &mut i.x)
        .field("speed", |i: &Inputs| &i.speed, |i| &mut i.speed)
}

fn config(retain_partial_lines: bool) -> LoggerConfig {
    let mut config = LoggerConfig::default();
    config.console.echo = false;
    config.console.retain_partial_lines = retain_partial_lines;
    config
}

fn recorded(ms: u64, x: i32) -> LogTable {
    let mut table = LogTable::new();
    table.set_timestamp(Duration::from_millis(ms));
    table.subtable("Inputs").put("x", x);
    table
}

/// Sink that records lifecycle calls into a shared journal and can be told
/// to fail.
struct JournalSink {
    label: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
    fail_start: bool,
    fail_after: Option<usize>,
    received: usize,
}

impl JournalSink {
    fn new(label: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            journal: Arc::clone(journal),
            fail_start: false,
            fail_after: None,
            received: 0,
        }
    }
}

impl Sink for JournalSink {
    fn name(&self) -> &str {
        self.label
    }

    fn start(&mut self) -> Result<(), SinkError> {
        self.journal.lock().push(format!("{} start", self.label));
        if self.fail_start {
            return Err(SinkError::Rejected {
                message: "not ready".to_owned(),
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.journal.lock().push(format!("{} stop", self.label));
        Ok(())
    }

    fn receive(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
        if self.fail_after == Some(self.received) {
            return Err(SinkError::Disconnected {
                reason: "viewer closed".to_owned(),
            });
        }
        self.received += 1;
        self.journal.lock().push(format!("{} receive", self.label));
        Ok(())
    }
}

struct BrokenSource;

impl Source for BrokenSource {
    fn refill(&mut self, _table: &mut LogTable) -> Result<bool, SourceError> {
        Err(SourceError::Corrupt {
            message: "truncated entry".to_owned(),
        })
    }
}

#[test]
fn every_sink_receives_every_cycle_in_order() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let first = MemorySink::named("first");
    let second = MemorySink::named("second");

    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(first.clone());
    logger.add_sink(JournalSink::new("journal", &journal));
    logger.add_sink(second.clone());
    logger.start().unwrap();

    let mut stamps = Vec::new();
    for cycle in 0..5_i32 {
        assert_eq!(logger.begin_cycle().unwrap(), CycleStart::Ready);
        stamps.push(logger.timestamp());
        logger.output("Cycle", cycle);
        logger.end_cycle().unwrap();
    }
    logger.stop().unwrap();

    for sink in [&first, &second] {
        let snapshots = sink.snapshots();
        assert_eq!(snapshots.len(), 5);
        let seen: Vec<i32> = snapshots
            .iter()
            .map(|s| s.view(REAL_OUTPUTS).get("Cycle", -1_i32))
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        let seen_stamps: Vec<Duration> = snapshots.iter().map(Snapshot::timestamp).collect();
        assert_eq!(seen_stamps, stamps);
    }

    let journal = journal.lock();
    assert_eq!(journal.first().map(String::as_str), Some("journal start"));
    assert_eq!(journal.last().map(String::as_str), Some("journal stop"));
    assert_eq!(journal.iter().filter(|e| e.ends_with("receive")).count(), 5);
}

#[test]
fn replay_ends_cleanly_after_two_refills() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());
    logger.set_source(MemorySource::from_tables([recorded(0, 1), recorded(10, 2)]));
    logger.start().unwrap();

    let mut cycles = 0;
    while logger.run_cycle(|_| {}).unwrap().is_ready() {
        cycles += 1;
    }

    assert_eq!(cycles, 2);
    assert_eq!(sink.len(), 2);
    assert!(!logger.is_running());
}

#[test]
fn replay_restores_recorded_inputs_and_timestamps() {
    let fields = input_fields();
    let mut inputs = Logged::new(Inputs::default(), &fields);

    let mut logger = CycleLogger::new(config(true));
    logger.set_source(MemorySource::from_tables([recorded(0, 1), recorded(10, 2)]));
    logger.start().unwrap();

    let mut xs = Vec::new();
    let mut stamps = Vec::new();
    while logger.begin_cycle().unwrap().is_ready() {
        logger.process("Inputs", &mut inputs);
        xs.push(inputs.x);
        stamps.push(logger.timestamp());
        logger.end_cycle().unwrap();
    }

    assert_eq!(xs, vec![1, 2]);
    assert_eq!(stamps, vec![Duration::ZERO, Duration::from_millis(10)]);
    assert_eq!(logger.begin_cycle().unwrap(), CycleStart::NotRunning);
}

#[test]
fn exhaustion_is_reported_once_then_not_running() {
    let mut logger = CycleLogger::new(config(true));
    logger.set_source(MemorySource::default());
    logger.start().unwrap();
    assert_eq!(logger.begin_cycle().unwrap(), CycleStart::Exhausted);
    assert_eq!(logger.begin_cycle().unwrap(), CycleStart::NotRunning);
}

#[test]
fn failing_sink_aborts_the_run() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut failing = JournalSink::new("viewer", &journal);
    failing.fail_after = Some(1);
    let healthy = JournalSink::new("file", &journal);

    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(healthy);
    logger.add_sink(failing);
    logger.start().unwrap();

    logger.run_cycle(|_| {}).unwrap();
    let err = logger.run_cycle(|_| {}).unwrap_err();

    match err {
        LoggerError::SinkAborted { sink, source } => {
            assert_eq!(sink, "viewer");
            assert!(matches!(source, SinkError::Disconnected { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!logger.is_running());
    assert_eq!(logger.sink_count(), 0);

    let journal = journal.lock();
    assert!(journal.iter().any(|e| e == "file stop"));
    assert!(journal.iter().any(|e| e == "viewer stop"));
}

#[test]
fn sink_start_failure_unwinds_started_sinks() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut broken = JournalSink::new("broken", &journal);
    broken.fail_start = true;

    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(JournalSink::new("ok", &journal));
    logger.add_sink(broken);

    let err = logger.start().unwrap_err();
    assert!(matches!(err, LoggerError::SinkStart { ref sink, .. } if sink == "broken"));
    assert!(!logger.is_running());
    assert!(!logger.console().is_active());

    let journal = journal.lock();
    assert_eq!(
        journal.as_slice(),
        ["ok start", "broken start", "ok stop"].map(String::from)
    );
}

#[test]
fn source_failure_is_fatal() {
    let mut logger = CycleLogger::new(config(true));
    logger.set_source(BrokenSource);
    logger.start().unwrap();

    let err = logger.begin_cycle().unwrap_err();
    assert!(matches!(
        err,
        LoggerError::Source {
            source: SourceError::Corrupt { .. }
        }
    ));
    assert!(!logger.is_running());
}

#[test]
fn calls_outside_a_run_do_nothing() {
    let fields = input_fields();
    let mut inputs = Logged::new(Inputs { x: 4, speed: 1.0 }, &fields);
    let sink = MemorySink::new();

    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());

    assert_eq!(logger.begin_cycle().unwrap(), CycleStart::NotRunning);
    logger.process("Inputs", &mut inputs);
    logger.output("Ignored", true);
    logger.output_enum("Phase", Phase::Moving);
    logger.end_cycle().unwrap();
    logger.stop().unwrap();

    assert_eq!(inputs.x, 4);
    assert!(sink.is_empty());
    assert!(logger.outputs().is_none());
    assert_eq!(logger.run_cycle(|_| {}).unwrap(), CycleStart::NotRunning);
}

#[test]
fn registration_is_ignored_while_running() {
    let late = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.start().unwrap();
    logger.add_sink(late.clone());
    logger.set_source(MemorySource::default());
    logger.add_metadata("Late", "yes");

    assert_eq!(logger.sink_count(), 0);
    assert!(!logger.has_source());
    logger.run_cycle(|_| {}).unwrap();
    assert!(late.is_empty());
    assert!(!logger.table().unwrap().view(REAL_METADATA).contains("Late"));
}

#[test]
fn metadata_regions_are_written_at_start() {
    let mut config = config(true);
    config
        .metadata
        .insert("Robot".to_owned(), "practice".to_owned());
    let sink = MemorySink::new();

    let mut logger = CycleLogger::new(config);
    logger.add_sink(sink.clone());
    logger.add_metadata("Event", "scrimmage");
    logger.set_signal_key("EnabledKey", "/Inputs/Enabled");
    logger.start().unwrap();
    let run_id = logger.run_id().unwrap();
    logger.run_cycle(|_| {}).unwrap();
    logger.stop().unwrap();

    let snapshot = sink.snapshots().remove(0);
    let metadata = snapshot.view(REAL_METADATA);
    assert_eq!(metadata.get("Robot", String::new()), "practice");
    assert_eq!(metadata.get("Event", String::new()), "scrimmage");
    assert_eq!(metadata.get(RUN_MODE_KEY, String::new()), "Recording");
    assert_eq!(metadata.get(RUN_ID_KEY, String::new()), run_id.to_string());
    assert!(!metadata.get(RUN_STARTED_AT_KEY, String::new()).is_empty());
    assert_eq!(
        snapshot.view(LOG_METADATA).get("EnabledKey", String::new()),
        "/Inputs/Enabled"
    );

    // The next run starts from the configured metadata only.
    let sink = MemorySink::new();
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    logger.run_cycle(|_| {}).unwrap();
    logger.stop().unwrap();
    let snapshot = sink.snapshots().remove(0);
    assert!(snapshot.view(REAL_METADATA).contains("Robot"));
    assert!(!snapshot.view(REAL_METADATA).contains("Event"));
    assert!(!snapshot.view(LOG_METADATA).contains("EnabledKey"));
}

#[test]
fn timings_are_recorded_every_cycle() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    logger.run_cycle(|_| {}).unwrap();
    logger.stop().unwrap();

    let snapshot = sink.snapshots().remove(0);
    let timings = snapshot.view(REAL_OUTPUTS).subtable(TIMINGS);
    let user = timings.get(USER_CODE_NS, -1_i64);
    let full = timings.get(FULL_CYCLE_NS, -1_i64);
    let logger_time = timings.get(LOGGER_CYCLE_NS, -1_i64);
    assert!(user >= 0);
    assert!(full >= user);
    assert_eq!(logger_time, full - user);
    assert!(timings.get(TABLE_READ_NS, -1_i64) >= 0);
}

#[test]
fn console_text_lands_in_the_outputs_immediate_mode() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(false));
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    let mut out = logger.console().stdout();

    logger.begin_cycle().unwrap();
    out.write_all(b"ab").unwrap();
    logger.end_cycle().unwrap();

    logger.begin_cycle().unwrap();
    out.write_all(b"c").unwrap();
    logger.end_cycle().unwrap();

    // Nothing printed.
    logger.begin_cycle().unwrap();
    logger.end_cycle().unwrap();
    let live = logger.table().unwrap();
    assert!(live.view(REAL_OUTPUTS).contains("Console"));
    logger.stop().unwrap();

    let consoles: Vec<Option<String>> = sink
        .snapshots()
        .iter()
        .map(|s| {
            s.view(REAL_OUTPUTS)
                .contains("Console")
                .then(|| s.view(REAL_OUTPUTS).get("Console", String::new()))
        })
        .collect();
    assert_eq!(
        consoles,
        vec![Some(String::from("ab")), Some(String::from("c")), None]
    );
}

#[test]
fn kept_snapshots_ignore_later_in_place_edits() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());
    logger.start().unwrap();

    logger
        .run_cycle(|l| l.output("Samples", vec![1.0_f64, 2.0, 3.0]))
        .unwrap();
    let kept = sink.snapshots().remove(0);

    logger
        .run_cycle(|l| {
            let mut outputs = l.outputs().unwrap();
            if let Some(Value::DoubleArray(samples)) = outputs.value_mut("Samples") {
                samples[0] = 99.0;
                samples.push(4.0);
            }
        })
        .unwrap();
    logger.stop().unwrap();

    assert_eq!(
        kept.view(REAL_OUTPUTS).get("Samples", Vec::<f64>::new()),
        vec![1.0, 2.0, 3.0]
    );
    let latest = sink.snapshots().remove(1);
    assert_eq!(
        latest.view(REAL_OUTPUTS).get("Samples", Vec::<f64>::new()),
        vec![99.0, 2.0, 3.0, 4.0]
    );
}

#[test]
fn console_retains_partial_lines_by_default() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    let mut err = logger.console().stderr();

    logger.begin_cycle().unwrap();
    err.write_all(b"ab").unwrap();
    logger.end_cycle().unwrap();

    logger.begin_cycle().unwrap();
    err.write_all(b"c\n").unwrap();
    logger.end_cycle().unwrap();
    logger.stop().unwrap();

    let snapshots = sink.snapshots();
    assert!(!snapshots[0].view(REAL_OUTPUTS).contains("Console"));
    assert_eq!(
        snapshots[1].view(REAL_OUTPUTS).get("Console", String::new()),
        "abc\n"
    );
    assert!(!logger.console().is_active());
}

#[test]
fn unterminated_tail_is_dropped_at_stop() {
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(sink.clone());
    logger.start().unwrap();

    logger.begin_cycle().unwrap();
    logger.console().stdout().write_all(b"done\npartial").unwrap();
    logger.end_cycle().unwrap();
    assert_eq!(logger.console().unpublished_len(), b"partial".len());
    logger.stop().unwrap();

    assert_eq!(logger.console().unpublished_len(), 0);
    assert_eq!(sink.len(), 1);
    assert_eq!(
        sink.snapshots()[0].view(REAL_OUTPUTS).get("Console", String::new()),
        "done\n"
    );

    // The next run starts from an empty buffer.
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    logger.begin_cycle().unwrap();
    logger.console().stdout().write_all(b"fresh\n").unwrap();
    logger.end_cycle().unwrap();
    logger.stop().unwrap();
    assert_eq!(
        sink.snapshots()[1].view(REAL_OUTPUTS).get("Console", String::new()),
        "fresh\n"
    );
}

#[test]
fn disabled_console_is_never_captured() {
    let mut config = config(false);
    config.console.enabled = false;
    let sink = MemorySink::new();
    let mut logger = CycleLogger::new(config);
    logger.add_sink(sink.clone());
    logger.start().unwrap();
    assert!(!logger.console().is_active());
    logger.begin_cycle().unwrap();
    logger.console().stdout().write_all(b"hidden").unwrap();
    logger.end_cycle().unwrap();
    logger.stop().unwrap();
    assert!(!sink.snapshots()[0].view(REAL_OUTPUTS).contains("Console"));
}

#[test]
fn record_then_replay_reproduces_outputs() {
    let fields = input_fields();
    let control = |logger: &mut CycleLogger, inputs: &mut Logged<'_, Inputs>| {
        logger.process("Inputs", inputs);
        let command = f64::from(inputs.x) * 0.5 + inputs.speed;
        logger.output("Command", command);
        let phase = if inputs.speed > 0.0 { Phase::Moving } else { Phase::Idle };
        logger.output_enum("Phase", phase);
    };

    let recording = MemorySink::new();
    let mut logger = CycleLogger::new(config(true));
    logger.add_sink(recording.clone());
    logger.start().unwrap();
    let mut live = Logged::new(Inputs::default(), &fields);
    for step in 0..4 {
        live.x = step;
        live.speed = f64::from(step) * 0.25;
        logger.run_cycle(|l| control(l, &mut live)).unwrap();
    }
    logger.stop().unwrap();

    let replay = MemorySink::new();
    logger.add_sink(replay.clone());
    logger.set_source(recording.to_source());
    logger.start().unwrap();
    let mut replayed = Logged::new(Inputs::default(), &fields);
    while logger.run_cycle(|l| control(l, &mut replayed)).unwrap().is_ready() {}

    let real = recording.snapshots();
    let again = replay.snapshots();
    assert_eq!(real.len(), 4);
    assert_eq!(again.len(), 4);
    for (live, replayed) in real.iter().zip(&again) {
        assert_eq!(live.timestamp(), replayed.timestamp());
        assert_eq!(
            live.view(REAL_OUTPUTS).get("Command", f64::NAN),
            replayed.view(REPLAY_OUTPUTS).get("Command", f64::NAN)
        );
        assert_eq!(
            live.view(REAL_OUTPUTS).get_enum("Phase", Phase::Idle),
            replayed.view(REPLAY_OUTPUTS).get_enum("Phase", Phase::Idle)
        );
        assert_eq!(
            replayed.view(REPLAY_METADATA).get(RUN_MODE_KEY, String::new()),
            "Replaying"
        );
        assert!(replayed.view(REPLAY_OUTPUTS).subtable(TIMINGS).contains(TABLE_READ_NS));
    }
}

#[test]
fn timer_follows_replayed_time() {
    let mut logger = CycleLogger::new(config(true));
    logger.set_source(MemorySource::from_tables([
        recorded(100, 0),
        recorded(350, 0),
    ]));
    logger.start().unwrap();

    logger.begin_cycle().unwrap();
    let timer = CycleTimer::new(&logger);
    logger.end_cycle().unwrap();

    logger.begin_cycle().unwrap();
    assert_eq!(timer.milliseconds(&logger), 250);
    logger.end_cycle().unwrap();
}

#[test]
fn dropping_a_running_logger_stops_sinks() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    {
        let mut logger = CycleLogger::new(config(true));
        logger.add_sink(JournalSink::new("file", &journal));
        logger.start().unwrap();
        logger.run_cycle(|_| {}).unwrap();
    }
    assert_eq!(journal.lock().last().map(String::as_str), Some("file stop"));
}
