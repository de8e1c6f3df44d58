//! Point-in-time view of a running scheduler.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::ExecutionBackend;
use crate::metrics::ModeMetrics;
use crate::mode_controller::ModeController;
use crate::state::Shared;
use crate::types::Mode;

/// Accounting of one mode at the moment of the snapshot
#[derive(Debug, Clone, Copy)]
pub struct ModeSnapshot {
    pub mode: Mode,
    pub metrics: ModeMetrics,
    /// Slots of this mode's pool still computing
    pub busy_slots: usize,
    /// Results of this mode completed but not yet delivered
    pub buffered: usize,
}

impl ModeSnapshot {
    /// Every frame admitted since the window opened is delivered, in flight or buffered
    pub fn is_balanced(&self) -> bool {
        self.metrics.frames_admitted
            == self.metrics.frames_completed + (self.busy_slots + self.buffered) as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSnapshot {
    pub active_mode: Mode,
    pub generation: u64,
    pub taken_at: Instant,
    modes: [ModeSnapshot; 2],
}

impl SchedulerSnapshot {
    pub fn mode(&self, mode: Mode) -> &ModeSnapshot {
        &self.modes[mode.index()]
    }

    pub fn active(&self) -> &ModeSnapshot {
        self.mode(self.active_mode)
    }

    pub fn is_balanced(&self) -> bool {
        self.modes.iter().all(ModeSnapshot::is_balanced)
    }
}

/// Cloneable handle that samples a dispatcher from any thread
pub struct SchedulerMonitor<B: ExecutionBackend> {
    shared: Arc<Shared<B::Input, B::Output>>,
    controller: Arc<ModeController<B>>,
}

impl<B: ExecutionBackend> Clone for SchedulerMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<B: ExecutionBackend> SchedulerMonitor<B> {
    pub(crate) fn new(
        shared: Arc<Shared<B::Input, B::Output>>,
        controller: Arc<ModeController<B>>,
    ) -> Self {
        Self { shared, controller }
    }

    /// Sample counters, slot states and the reorder buffer under one lock
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.shared.lock();

        let mut buffered = [0usize; 2];
        for (_, result) in state.completed.iter() {
            buffered[result.mode.index()] += 1;
        }

        let modes = Mode::ALL.map(|mode| ModeSnapshot {
            mode,
            metrics: *state.mode.metrics(mode),
            busy_slots: self.controller.pool(mode).busy_count(),
            buffered: buffered[mode.index()],
        });

        SchedulerSnapshot {
            active_mode: state.mode.active(),
            generation: state.mode.generation(),
            taken_at: Instant::now(),
            modes,
        }
    }
}
