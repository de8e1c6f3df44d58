//! Type definitions shared by the scheduler components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Index of a worker slot inside its pool
pub type SlotId = usize;

/// Execution mode selecting which pool receives new frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// User specified pool, tuned for throughput (many slots)
    #[default]
    Primary,
    /// Single-slot pool, tuned for latency
    LowLatency,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Primary, Mode::LowLatency];

    /// The mode a toggle request switches to
    pub fn other(self) -> Mode {
        match self {
            Mode::Primary => Mode::LowLatency,
            Mode::LowLatency => Mode::Primary,
        }
    }

    /// Stable index for per-mode tables
    pub fn index(self) -> usize {
        match self {
            Mode::Primary => 0,
            Mode::LowLatency => 1,
        }
    }

    /// Human readable label used in logs and reports
    pub fn label(self) -> &'static str {
        match self {
            Mode::Primary => "primary",
            Mode::LowLatency => "low-latency",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One frame travelling through the scheduler
#[derive(Debug, Clone)]
pub struct InputUnit<T> {
    pub payload: T,
    /// When the frame was handed to a worker slot
    pub dispatched_at: Instant,
}

impl<T> InputUnit<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            dispatched_at: Instant::now(),
        }
    }
}

/// A completed frame waiting in the reorder buffer for its turn
#[derive(Debug)]
pub struct PendingResult<T, R> {
    pub sequence_id: u64,
    pub payload: InputUnit<T>,
    /// Owned copy of the backend output, taken at completion time
    pub raw_output: R,
    /// Admission time, used for latency accounting
    pub started_at: Instant,
    /// Whether `mode` was the active mode when the frame was submitted
    ///
    /// Captured at admission, never at completion: a frame still in flight
    /// when the run switches away keeps the flag and is counted in `mode`'s
    /// metrics when delivered.
    pub produced_in_active_mode: bool,
    /// Mode active at submission
    pub mode: Mode,
    /// Slot that produced the result
    pub slot: SlotId,
    /// Mode generation at submission (bumped on every switch)
    pub generation: u64,
}
