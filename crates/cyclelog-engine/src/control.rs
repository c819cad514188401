//! The simulated control loop driven by the engine.
//!
//! A single-axis mechanism is held at alternating setpoints by a PD
//! controller. [`Plant`] stands in for hardware: it integrates the applied
//! voltage and reports noisy sensor readings. [`Controller`] is the control
//! code under test. It only sees the plant through [`PlantInputs`], which
//! pass through the logger, so a replay feeds it exactly what the recording
//! saw.

use std::time::Duration;

use cyclelog_core::inputs::{FieldSet, Logged};
use cyclelog_core::logger::CycleLogger;
use cyclelog_core::timer::CycleTimer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

cyclelog_types::log_enum! {
    /// Operating mode reported by the plant.
    pub enum DriveMode {
        /// Outputs are forced to zero.
        Disabled,
        /// The controller tracks the setpoint.
        Tracking,
    }
}

/// Subtable the plant inputs are logged under.
pub const INPUTS_TABLE: &str = "Plant";

/// Proportional gain, volts per unit of error.
const KP: f64 = 18.0;
/// Derivative gain, volts per unit of velocity.
const KD: f64 = 1.5;
/// Actuator saturation.
const MAX_VOLTS: f64 = 12.0;
/// Error below which the mechanism counts as settled.
const TOLERANCE: f64 = 0.02;
/// Setpoints visited in turn.
const LOW_SETPOINT: f64 = 0.25;
const HIGH_SETPOINT: f64 = 1.0;
/// How long each setpoint is held, in log time.
const SEGMENT_MS: u128 = 1_000;

/// Sensor readings for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantInputs {
    /// Measured position.
    pub position: f64,
    /// Measured velocity.
    pub velocity: f64,
    /// Whether outputs are allowed.
    pub enabled: bool,
    /// Reported mode.
    pub mode: DriveMode,
}

impl Default for PlantInputs {
    fn default() -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            enabled: false,
            mode: DriveMode::Disabled,
        }
    }
}

/// Field bindings for [`PlantInputs`].
pub fn plant_fields() -> FieldSet<PlantInputs> {
    FieldSet::new()
        .field("Position", |i: &PlantInputs| &i.position, |i| &mut i.position)
        .field("Velocity", |i: &PlantInputs| &i.velocity, |i| &mut i.velocity)
        .field("Enabled", |i: &PlantInputs| &i.enabled, |i| &mut i.enabled)
        .enum_field("Mode", |i: &PlantInputs| &i.mode, |i| &mut i.mode)
}

/// Simulated mechanism with seeded sensor noise.
#[derive(Debug)]
pub struct Plant {
    position: f64,
    velocity: f64,
    rng: StdRng,
    noise: f64,
}

impl Plant {
    /// Create a plant at rest at zero.
    pub fn new(seed: u64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            rng: StdRng::seed_from_u64(seed),
            noise: 0.002,
        }
    }

    /// Apply `volts` for `dt`.
    pub fn step(&mut self, volts: f64, dt: Duration) {
        let dt = dt.as_secs_f64();
        let accel = volts * 4.0 - self.velocity * 6.0;
        self.velocity += accel * dt;
        self.position += self.velocity * dt;
    }

    /// Read the sensors.
    pub fn sense(&mut self, enabled: bool) -> PlantInputs {
        let jitter = self.rng.random_range(-self.noise..=self.noise);
        PlantInputs {
            position: self.position + jitter,
            velocity: self.velocity,
            enabled,
            mode: if enabled {
                DriveMode::Tracking
            } else {
                DriveMode::Disabled
            },
        }
    }
}

/// PD position controller. Holds no state that is not derived from its
/// logged inputs or log time, so a replay reproduces it exactly.
#[derive(Debug, Default)]
pub struct Controller {
    timer: Option<CycleTimer>,
    settled: bool,
}

impl Controller {
    /// Create a controller; its setpoint clock starts on the first cycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one cycle of control code and return the commanded voltage.
    pub fn cycle(&mut self, logger: &mut CycleLogger, inputs: &mut Logged<'_, PlantInputs>) -> f64 {
        logger.process(INPUTS_TABLE, inputs);

        let timer = *self
            .timer
            .get_or_insert_with(|| CycleTimer::new(&*logger));
        let target = if (timer.milliseconds(&*logger) / SEGMENT_MS) % 2 == 0 {
            HIGH_SETPOINT
        } else {
            LOW_SETPOINT
        };

        let error = target - inputs.position;
        let volts = if inputs.enabled {
            (KP * error - KD * inputs.velocity).clamp(-MAX_VOLTS, MAX_VOLTS)
        } else {
            0.0
        };

        let settled = inputs.enabled && error.abs() < TOLERANCE;
        if settled && !self.settled {
            info!(setpoint = target, position = inputs.position, "Setpoint reached");
        }
        self.settled = settled;

        logger.output("Target", target);
        logger.output("Error", error);
        logger.output("Volts", volts);
        logger.output("Settled", settled);
        logger.output_enum("Mode", inputs.mode);
        volts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plant_moves_toward_positive_voltage() {
        let mut plant = Plant::new(1);
        for _ in 0..50 {
            plant.step(6.0, Duration::from_millis(20));
        }
        let reading = plant.sense(true);
        assert!(reading.position > 0.1);
        assert_eq!(reading.mode, DriveMode::Tracking);
    }

    #[test]
    fn same_seed_same_noise() {
        let mut a = Plant::new(9);
        let mut b = Plant::new(9);
        for _ in 0..5 {
            assert_eq!(a.sense(true), b.sense(true));
        }
    }

    #[test]
    fn disabled_controller_commands_nothing() {
        let mut logger = CycleLogger::default();
        logger.start().unwrap();
        logger.begin_cycle().unwrap();
        let fields = plant_fields();
        let mut inputs = Logged::new(PlantInputs::default(), &fields);
        let volts = Controller::new().cycle(&mut logger, &mut inputs);
        logger.end_cycle().unwrap();
        logger.stop().unwrap();
        assert!(volts.abs() < f64::EPSILON);
    }
}
