//! Compare the outputs of a recording with the outputs of its replay.
//!
//! Every key directly in the recorded `RealOutputs` table must hold the
//! same value in the replayed `ReplayOutputs` table on the same cycle.
//! Captured console text is skipped: log lines carry wall-clock times.

use std::fmt;

use cyclelog_core::console::CONSOLE_KEY;
use cyclelog_core::logger::{REAL_OUTPUTS, REPLAY_OUTPUTS};
use cyclelog_types::{Snapshot, Value};

/// One output that differs between recording and replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    /// 0-based cycle index.
    pub cycle: usize,
    /// Output key.
    pub key: String,
    /// Value in the recording.
    pub recorded: Option<Value>,
    /// Value in the replay.
    pub replayed: Option<Value>,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} output '{}': recorded {:?}, replayed {:?}",
            self.cycle, self.key, self.recorded, self.replayed
        )
    }
}

/// Result of comparing a recording with its replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comparison {
    /// Cycles in the recording.
    pub recorded_cycles: usize,
    /// Cycles in the replay.
    pub replayed_cycles: usize,
    /// Outputs compared.
    pub outputs_checked: usize,
    /// Every difference found.
    pub divergences: Vec<Divergence>,
}

impl Comparison {
    /// Whether the replay reproduced the recording exactly.
    pub fn is_identical(&self) -> bool {
        self.recorded_cycles == self.replayed_cycles && self.divergences.is_empty()
    }
}

/// Compare recorded and replayed snapshots cycle by cycle.
pub fn compare_outputs(recorded: &[Snapshot], replayed: &[Snapshot]) -> Comparison {
    let mut comparison = Comparison {
        recorded_cycles: recorded.len(),
        replayed_cycles: replayed.len(),
        ..Comparison::default()
    };

    for (cycle, (real, replay)) in recorded.iter().zip(replayed).enumerate() {
        let real_outputs = real.view(REAL_OUTPUTS);
        for key in real_outputs.keys().filter(|key| *key != CONSOLE_KEY) {
            let expected = real.value(&format!("/{REAL_OUTPUTS}/{key}"));
            let actual = replay.value(&format!("/{REPLAY_OUTPUTS}/{key}"));
            comparison.outputs_checked = comparison.outputs_checked.saturating_add(1);
            if expected != actual {
                comparison.divergences.push(Divergence {
                    cycle,
                    key: key.to_owned(),
                    recorded: expected.cloned(),
                    replayed: actual.cloned(),
                });
            }
        }
    }
    comparison
}
