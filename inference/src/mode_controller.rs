/// Mode controller - owns both pools and performs drain-and-swap switches
///
/// A switch happens in two halves around the dispatcher's flush:
/// - `begin_switch` flips the active mode and bumps the generation under the
///   shared lock, drains the previous pool with the lock released, then
///   rebuilds the free set for the new pool
/// - the dispatcher delivers every result left in the reorder buffer, all of
///   which belong to the previous mode
/// - `finish_switch` closes the previous mode's window and opens the new one
use crate::backend::ExecutionBackend;
use crate::error::{Result, SchedulerError};
use crate::metrics::ModeMetrics;
use crate::pool::{FreeSlots, Pool};
use crate::state::{SchedulerState, Shared};
use crate::types::Mode;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Active mode, its generation counter and the per-mode metrics
#[derive(Debug, Clone)]
pub struct ModeState {
    active: Mode,
    generation: u64,
    metrics: [ModeMetrics; 2],
    pending_toggles: u32,
}

impl ModeState {
    pub fn new(initial: Mode, now: Instant) -> Self {
        let mut idle = ModeMetrics::start(now);
        idle.close(now);
        let mut metrics = [idle; 2];
        metrics[initial.index()] = ModeMetrics::start(now);

        Self {
            active: initial,
            generation: 0,
            metrics,
            pending_toggles: 0,
        }
    }

    pub fn active(&self) -> Mode {
        self.active
    }

    /// Bumped on every flip; results carry the value from their submission
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn metrics(&self, mode: Mode) -> &ModeMetrics {
        &self.metrics[mode.index()]
    }

    /// Switch to the other mode, returning the previous one
    pub fn flip(&mut self) -> Mode {
        let previous = self.active;
        self.active = previous.other();
        self.generation += 1;
        previous
    }

    /// Count a frame handed to `mode`'s pool
    pub fn admit(&mut self, mode: Mode) {
        self.metrics[mode.index()].admit();
    }

    pub fn record(&mut self, mode: Mode, latency: Duration) {
        self.metrics[mode.index()].record(latency);
    }

    /// Close `previous`'s window and reset the active mode's metrics
    pub fn open_window(&mut self, previous: Mode, now: Instant) {
        self.metrics[previous.index()].close(now);
        self.metrics[self.active.index()] = ModeMetrics::start(now);
    }

    pub fn request_toggle(&mut self) {
        self.pending_toggles = self.pending_toggles.saturating_add(1);
    }

    pub fn has_toggle_request(&self) -> bool {
        self.pending_toggles > 0
    }

    /// Consume one pending toggle request
    pub fn take_toggle_request(&mut self) -> bool {
        if self.pending_toggles == 0 {
            return false;
        }
        self.pending_toggles -= 1;
        true
    }
}

/// Proof that the first half of a switch completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTicket {
    pub previous: Mode,
    pub next: Mode,
    pub drained_in: Duration,
}

pub struct ModeController<B: ExecutionBackend> {
    pools: [Pool<B>; 2],
}

impl<B: ExecutionBackend> ModeController<B> {
    pub fn new(primary: Pool<B>, low_latency: Pool<B>) -> Result<Self> {
        if primary.mode() != Mode::Primary || low_latency.mode() != Mode::LowLatency {
            return Err(SchedulerError::config(format!(
                "pools passed in the wrong order ({} / {})",
                primary.mode(),
                low_latency.mode()
            )));
        }
        Ok(Self {
            pools: [primary, low_latency],
        })
    }

    pub fn pool(&self, mode: Mode) -> &Pool<B> {
        &self.pools[mode.index()]
    }

    /// Flip the mode, drain the previous pool and hand the new pool's slots to the free set
    pub(crate) fn begin_switch(
        &self,
        shared: &Shared<B::Input, B::Output>,
    ) -> Result<SwitchTicket> {
        let (previous, next, generation) = {
            let mut state = shared.lock();
            let previous = state.mode.flip();
            (previous, state.mode.active(), state.mode.generation())
        };

        log::info!(
            "Switching {} -> {}: draining {} in-flight frame(s)",
            previous,
            next,
            self.pool(previous).busy_count()
        );

        let drain_started = Instant::now();
        self.pool(previous).drain_all();
        let drained_in = drain_started.elapsed();

        // The incoming pool was drained when it was last switched away from
        if let Some(slot) = self.pool(next).first_busy() {
            return Err(SchedulerError::AlreadyBusy { slot, mode: next });
        }

        shared.lock().free = FreeSlots::for_pool(self.pool(next), generation);

        Ok(SwitchTicket {
            previous,
            next,
            drained_in,
        })
    }

    /// Close the previous window and start measuring the new mode
    pub(crate) fn finish_switch(
        &self,
        state: &mut SchedulerState<B::Input, B::Output>,
        ticket: SwitchTicket,
        now: Instant,
    ) {
        state.mode.open_window(ticket.previous, now);
        log::info!(
            "Switched to {} mode ({} slot(s)); drain took {:.1} ms",
            ticket.next,
            self.pool(ticket.next).len(),
            ticket.drained_in.as_secs_f64() * 1e3
        );
    }

    /// Block until no slot of either pool is busy
    pub fn drain_all_pools(&self) {
        for pool in &self.pools {
            pool.drain_all();
        }
    }
}

/// Object-safe view of whatever can receive a toggle request
pub(crate) trait ToggleTarget: Send + Sync {
    fn request_toggle(&self);
}

/// Cloneable handle for requesting a mode switch from any thread
///
/// The dispatcher performs the switch at the top of its next iteration.
#[derive(Clone)]
pub struct ModeSwitch {
    target: Arc<dyn ToggleTarget>,
}

impl ModeSwitch {
    pub(crate) fn new(target: Arc<dyn ToggleTarget>) -> Self {
        Self { target }
    }

    pub fn request_toggle(&self) {
        self.target.request_toggle();
    }
}

impl fmt::Debug for ModeSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeSwitch").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ManualBackend;
    use crate::types::InputUnit;
    use std::thread;

    type Backend = ManualBackend<u64, u64>;

    fn controller(primary_slots: usize) -> (ModeController<Backend>, Arc<Backend>, Arc<Backend>) {
        let primary = Arc::new(ManualBackend::new("primary"));
        let low_latency = Arc::new(ManualBackend::new("low-latency"));
        let controller = ModeController::new(
            Pool::new(Mode::Primary, primary_slots, Arc::clone(&primary)).unwrap(),
            Pool::new(Mode::LowLatency, 1, Arc::clone(&low_latency)).unwrap(),
        )
        .unwrap();
        (controller, primary, low_latency)
    }

    fn shared(controller: &ModeController<Backend>) -> Shared<u64, u64> {
        let now = Instant::now();
        Shared::new(SchedulerState::new(
            ModeState::new(Mode::Primary, now),
            FreeSlots::for_pool(controller.pool(Mode::Primary), 0),
        ))
    }

    #[test]
    fn test_initial_state() {
        let now = Instant::now();
        let state = ModeState::new(Mode::LowLatency, now);

        assert_eq!(state.active(), Mode::LowLatency);
        assert_eq!(state.generation(), 0);
        assert!(state.metrics(Mode::LowLatency).is_open());
        assert!(!state.metrics(Mode::Primary).is_open());
    }

    #[test]
    fn test_flip_bumps_generation() {
        let mut state = ModeState::new(Mode::Primary, Instant::now());

        assert_eq!(state.flip(), Mode::Primary);
        assert_eq!(state.active(), Mode::LowLatency);
        assert_eq!(state.flip(), Mode::LowLatency);
        assert_eq!(state.generation(), 2);
    }

    #[test]
    fn test_open_window_resets_new_mode_only() {
        let start = Instant::now();
        let mut state = ModeState::new(Mode::Primary, start);
        state.record(Mode::Primary, Duration::from_millis(10));
        state.record(Mode::Primary, Duration::from_millis(30));

        state.flip();
        let switched = start + Duration::from_secs(1);
        state.open_window(Mode::Primary, switched);

        let primary = state.metrics(Mode::Primary);
        assert_eq!(primary.frames_completed, 2);
        assert_eq!(primary.window_end, Some(switched));
        let low_latency = state.metrics(Mode::LowLatency);
        assert_eq!(low_latency.frames_completed, 0);
        assert_eq!(low_latency.window_start, switched);
        assert!(low_latency.is_open());
    }

    #[test]
    fn test_toggle_requests_are_counted() {
        let mut state = ModeState::new(Mode::Primary, Instant::now());
        state.request_toggle();
        state.request_toggle();
        assert!(state.has_toggle_request());

        assert!(state.take_toggle_request());
        assert!(state.take_toggle_request());
        assert!(!state.take_toggle_request());
        assert!(!state.has_toggle_request());
    }

    #[test]
    fn test_pools_must_match_their_modes() {
        let backend: Arc<Backend> = Arc::new(ManualBackend::new("manual"));
        let result = ModeController::new(
            Pool::new(Mode::LowLatency, 1, Arc::clone(&backend)).unwrap(),
            Pool::new(Mode::Primary, 1, backend).unwrap(),
        );
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_begin_switch_drains_previous_pool() {
        let (controller, primary, _) = controller(2);
        let shared = shared(&controller);

        {
            let mut state = shared.lock();
            for frame in 0..2 {
                let slot = controller.pool(Mode::Primary).try_acquire(&mut state.free).unwrap();
                slot.submit(InputUnit::new(frame), |_, _, _| {}).unwrap();
            }
        }

        let completer = {
            let primary = Arc::clone(&primary);
            thread::spawn(move || {
                primary.wait_for_pending(2);
                thread::sleep(Duration::from_millis(20));
                primary.complete(|input| *input == 1, |input| Ok(*input));
                primary.complete(|input| *input == 0, |input| Ok(*input));
            })
        };

        let ticket = controller.begin_switch(&shared).unwrap();
        completer.join().unwrap();

        assert_eq!(ticket.previous, Mode::Primary);
        assert_eq!(ticket.next, Mode::LowLatency);
        assert_eq!(controller.pool(Mode::Primary).busy_count(), 0);

        let mut state = shared.lock();
        assert_eq!(state.mode.active(), Mode::LowLatency);
        assert_eq!(state.free.mode(), Mode::LowLatency);
        assert_eq!(state.free.generation(), 1);
        assert_eq!(state.free.len(), 1);
        // Nothing admitted after the switch can reach the primary pool
        assert!(controller
            .pool(Mode::Primary)
            .try_acquire(&mut state.free)
            .is_none());

        let now = Instant::now();
        controller.finish_switch(&mut state, ticket, now);
        assert_eq!(state.mode.metrics(Mode::Primary).window_end, Some(now));
        assert_eq!(state.mode.metrics(Mode::LowLatency).window_start, now);
    }

    #[test]
    fn test_mode_switch_handle_wakes_waiter() {
        let (controller, _, _) = controller(1);
        let shared = Arc::new(shared(&controller));
        let handle = ModeSwitch::new(Arc::clone(&shared) as Arc<dyn ToggleTarget>);

        let requester = {
            let handle = handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handle.request_toggle();
            })
        };

        let mut state = shared.lock();
        while !state.mode.take_toggle_request() {
            state = shared.wait_timeout(state, Duration::from_millis(50));
        }
        drop(state);
        requester.join().unwrap();
    }
}
