//! Demo binary for cyclelog.
//!
//! Runs a simulated control loop twice: once live, recording every cycle to
//! a JSON Lines file, and once replaying that file through the same control
//! code. The replayed outputs must match the recorded ones exactly.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cyclelog.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing) through the console capture
//! 3. Record the live run to the JSON Lines file, streaming snapshots to an
//!    async viewer task
//! 4. Replay the file through the same control code
//! 5. Compare recorded and replayed outputs

mod config;
mod control;
mod error;
mod verify;

use std::path::Path;
use std::time::Duration;

use cyclelog_core::console::ConsoleCapture;
use cyclelog_core::dataflow::MemorySink;
use cyclelog_core::inputs::Logged;
use cyclelog_core::logger::{CycleLogger, REAL_OUTPUTS};
use cyclelog_io::{ChannelSink, JsonLinesSink, JsonLinesSource};
use cyclelog_types::Snapshot;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::control::{Controller, Plant, PlantInputs};
use crate::error::EngineError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "cyclelog.yaml";

/// Cycles recorded with outputs disabled before the controller engages.
const ENABLE_AFTER_CYCLES: u32 = 5;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, recording, or replay fails, or if the
/// replay diverges from the recording.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration. This comes first because the console settings
    //    decide where log lines are written.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging through the console capture so log
    //    lines land in each cycle's Console output.
    let console = ConsoleCapture::new(&config.logger.console);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_ansi(false)
        .with_writer(console.stderr())
        .init();

    info!(
        config_file = from_file,
        cycles = config.run.cycles,
        cycle_period_ms = config.run.cycle_period_ms,
        seed = config.run.seed,
        recording = %config.run.recording_path.display(),
        "cyclelog-engine starting"
    );

    // 3. Record.
    let recorded = record(&config, &console).await?;
    info!(cycles = recorded.len(), "Recording complete");

    // 4. Replay.
    let replayed = replay(&config, &console)?;
    info!(cycles = replayed.len(), "Replay complete");

    // 5. Verify.
    let comparison = verify::compare_outputs(&recorded, &replayed);
    if !comparison.is_identical() {
        warn!(
            recorded_cycles = comparison.recorded_cycles,
            replayed_cycles = comparison.replayed_cycles,
            divergences = comparison.divergences.len(),
            "Replay diverged from recording"
        );
        let first = comparison.divergences.first().map_or_else(
            || {
                format!(
                    "recorded {} cycles, replayed {}",
                    comparison.recorded_cycles, comparison.replayed_cycles
                )
            },
            ToString::to_string,
        );
        return Err(EngineError::Diverged {
            count: comparison.divergences.len(),
            first,
        }
        .into());
    }

    info!(
        cycles = comparison.recorded_cycles,
        outputs_checked = comparison.outputs_checked,
        "Replay matches recording, cyclelog-engine shutdown complete"
    );
    Ok(())
}

/// Load the engine configuration from `cyclelog.yaml`, falling back to
/// defaults when the file does not exist. Returns whether a file was read.
fn load_config() -> Result<(EngineConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((EngineConfig::from_file(config_path)?, true))
    } else {
        Ok((EngineConfig::parse("{}")?, false))
    }
}

/// Drive the live plant for the configured number of cycles, recording
/// every cycle. Returns the recorded snapshots.
async fn record(config: &EngineConfig, console: &ConsoleCapture) -> Result<Vec<Snapshot>, EngineError> {
    let run = &config.run;
    let mut logger = CycleLogger::with_console(config.logger.clone(), console.clone());

    let recorded = MemorySink::named("recorded");
    let (viewer_sink, viewer_rx) = ChannelSink::new("viewer");
    logger.add_sink(JsonLinesSink::create(&run.recording_path)?);
    logger.add_sink(recorded.clone());
    logger.add_sink(viewer_sink);
    logger.add_metadata("Program", env!("CARGO_PKG_NAME"));
    logger.add_metadata("Seed", &run.seed.to_string());
    logger.set_signal_key("EnabledKey", "/Plant/Enabled");
    let viewer = tokio::spawn(watch(viewer_rx));

    let fields = control::plant_fields();
    let mut inputs = Logged::new(PlantInputs::default(), &fields);
    let mut plant = Plant::new(run.seed);
    let mut controller = Controller::new();

    let period = Duration::from_millis(run.cycle_period_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    logger.start()?;
    for cycle in 0..run.cycles {
        ticker.tick().await;
        if !logger.begin_cycle()?.is_ready() {
            break;
        }
        *inputs = plant.sense(cycle >= ENABLE_AFTER_CYCLES);
        let volts = controller.cycle(&mut logger, &mut inputs);
        logger.end_cycle()?;
        plant.step(volts, period);
    }
    // Stopping drops the channel sink, which ends the viewer.
    logger.stop()?;

    let summary = viewer.await.map_err(|e| EngineError::Viewer {
        message: e.to_string(),
    })?;
    info!(
        snapshots = summary.snapshots,
        settled_cycles = summary.settled_cycles,
        "Viewer finished"
    );
    Ok(recorded.snapshots())
}

/// Replay the recording through the same control code. Returns the
/// replayed snapshots.
fn replay(config: &EngineConfig, console: &ConsoleCapture) -> Result<Vec<Snapshot>, EngineError> {
    let mut logger = CycleLogger::with_console(config.logger.clone(), console.clone());
    let replayed = MemorySink::named("replayed");
    logger.add_sink(replayed.clone());
    logger.set_source(JsonLinesSource::open(&config.run.recording_path)?);
    logger.start()?;

    let fields = control::plant_fields();
    let mut inputs = Logged::new(PlantInputs::default(), &fields);
    let mut controller = Controller::new();
    while logger
        .run_cycle(|logger| {
            controller.cycle(logger, &mut inputs);
        })?
        .is_ready()
    {}

    Ok(replayed.snapshots())
}

/// What the viewer saw.
#[derive(Debug, Default)]
struct ViewerSummary {
    snapshots: u64,
    settled_cycles: u64,
}

/// Consume snapshots as an async viewer would until the sink goes away.
async fn watch(mut rx: mpsc::UnboundedReceiver<Snapshot>) -> ViewerSummary {
    let mut summary = ViewerSummary::default();
    while let Some(snapshot) = rx.recv().await {
        summary.snapshots = summary.snapshots.saturating_add(1);
        let outputs = snapshot.view(REAL_OUTPUTS);
        if outputs.get("Settled", false) {
            summary.settled_cycles = summary.settled_cycles.saturating_add(1);
        }
        debug!(
            timestamp_ms = snapshot.timestamp().as_millis(),
            error = outputs.get("Error", 0.0_f64),
            "Viewer received snapshot"
        );
    }
    summary
}
