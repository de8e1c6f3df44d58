//! Lock-protected state shared between the control thread and completion callbacks.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::SchedulerError;
use crate::metrics::WallclockMeter;
use crate::mode_controller::{ModeState, ToggleTarget};
use crate::pool::FreeSlots;
use crate::reorder_buffer::ReorderBuffer;
use crate::sync::{lock, wait_timeout};
use crate::types::PendingResult;

pub(crate) struct SchedulerState<I, O> {
    pub(crate) mode: ModeState,
    pub(crate) free: FreeSlots,
    pub(crate) completed: ReorderBuffer<PendingResult<I, O>>,
    pub(crate) failure: Option<SchedulerError>,
    pub(crate) wallclock: WallclockMeter,
}

impl<I, O> SchedulerState<I, O> {
    pub(crate) fn new(mode: ModeState, free: FreeSlots) -> Self {
        Self {
            mode,
            free,
            completed: ReorderBuffer::new(),
            failure: None,
            wallclock: WallclockMeter::new(),
        }
    }

    /// Keep the first failure; later ones are only logged
    pub(crate) fn capture_failure(&mut self, err: SchedulerError) {
        if self.failure.is_some() {
            log::error!("Additional failure after the first: {}", err);
            return;
        }
        log::error!("Captured failure: {}", err);
        self.failure = Some(err);
    }
}

pub(crate) struct Shared<I, O> {
    state: Mutex<SchedulerState<I, O>>,
    wakeup: Condvar,
}

impl<I, O> Shared<I, O> {
    pub(crate) fn new(state: SchedulerState<I, O>) -> Self {
        Self {
            state: Mutex::new(state),
            wakeup: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SchedulerState<I, O>> {
        lock(&self.state)
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, SchedulerState<I, O>>,
        timeout: Duration,
    ) -> MutexGuard<'a, SchedulerState<I, O>> {
        wait_timeout(&self.wakeup, guard, timeout)
    }

    pub(crate) fn notify(&self) {
        self.wakeup.notify_all();
    }
}

impl<I: Send, O: Send> ToggleTarget for Shared<I, O> {
    fn request_toggle(&self) {
        self.lock().mode.request_toggle();
        self.notify();
    }
}
