/// Dispatcher - the scheduler's control loop
///
/// Each iteration, in priority order:
/// 0. surface a failure captured by a completion callback, honour a stop
///    request, perform a pending mode switch
/// 1. deliver the next in-order result to the consumer
/// 2. admit a new frame into a free slot of the active pool
/// 3. wait for a completion, a failure or a toggle request
///
/// Completions arrive on backend threads, are inserted into the reorder
/// buffer under the shared lock and wake the control thread. Frames are
/// delivered strictly by sequence id, whatever order the workers finish in.
///
/// The source is polled, never waited on: when it has nothing ready the
/// slot goes back to the free set and the loop keeps serving completions
/// and toggles, re-polling every `SOURCE_POLL_INTERVAL`.
use crate::backend::ExecutionBackend;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::metrics::{ModeMetrics, ModeReport};
use crate::mode_controller::{ModeController, ModeState, ModeSwitch, ToggleTarget};
use crate::monitor::SchedulerMonitor;
use crate::pool::{FreeSlots, Pool};
use crate::source::{FrameSource, Next};
use crate::state::{SchedulerState, Shared};
use crate::types::{InputUnit, Mode, PendingResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a waiting dispatcher re-checks for abandoned completions
const STALL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How soon a source that had nothing ready is polled again
const SOURCE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What the consumer wants after a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Continue,
    /// Switch to the other mode before admitting more frames
    ToggleMode,
    /// End the run; in-flight frames are drained and discarded
    Stop,
}

/// Scheduler view handed to the consumer with every result
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub sequence_id: u64,
    /// Mode the frame was submitted in
    pub mode: Mode,
    /// Mode active at delivery
    pub active_mode: Mode,
    /// Metrics of the submitting mode, including this frame
    pub metrics: ModeMetrics,
    /// Smoothed interval between completions
    pub wallclock: Option<Duration>,
    /// Results still waiting in the reorder buffer
    pub buffered: usize,
    pub latency: Duration,
    pub delivered_at: Instant,
}

impl DeliveryContext {
    /// Windowed FPS of the submitting mode
    pub fn fps(&self) -> f64 {
        self.metrics.fps(self.delivered_at)
    }

    pub fn wallclock_ms(&self) -> Option<f64> {
        self.wallclock.map(|interval| interval.as_secs_f64() * 1e3)
    }
}

/// Receives results in sequence order
pub trait FrameConsumer<I, O> {
    fn accept(&mut self, result: PendingResult<I, O>, ctx: &DeliveryContext) -> Result<Delivery>;
}

impl<I, O, F> FrameConsumer<I, O> for F
where
    F: FnMut(PendingResult<I, O>, &DeliveryContext) -> Result<Delivery>,
{
    fn accept(&mut self, result: PendingResult<I, O>, ctx: &DeliveryContext) -> Result<Delivery> {
        self(result, ctx)
    }
}

/// End-of-run report
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames_admitted: u64,
    pub frames_delivered: u64,
    /// Results completed but never delivered (stop or failure)
    pub frames_abandoned: usize,
    pub switches: u32,
    pub final_mode: Mode,
    pub stopped_by_consumer: bool,
    pub elapsed_secs: f64,
    pub wallclock_fps: Option<f64>,
    /// Latest window of every mode that completed frames
    pub modes: Vec<ModeReport>,
}

impl RunSummary {
    pub fn report(&self, mode: Mode) -> Option<&ModeReport> {
        self.modes.iter().find(|report| report.mode == mode)
    }

    pub fn log(&self) {
        log::info!(
            "Run finished: {} delivered / {} admitted in {:.2}s, {} switch(es), final mode {}",
            self.frames_delivered,
            self.frames_admitted,
            self.elapsed_secs,
            self.switches,
            self.final_mode
        );
        for report in &self.modes {
            log::info!(
                "  {:<12} {:>6} frames  {:>7.1} FPS  {:>7.2} ms mean latency",
                report.mode.label(),
                report.frames,
                report.fps,
                report.mean_latency_ms
            );
        }
        if self.frames_abandoned > 0 {
            log::warn!("  {} completed frame(s) were not delivered", self.frames_abandoned);
        }
    }
}

pub struct Dispatcher<B: ExecutionBackend> {
    controller: Arc<ModeController<B>>,
    shared: Arc<Shared<B::Input, B::Output>>,
    /// Id assigned to the next admitted frame
    next_id: u64,
    /// Id the consumer expects next
    expected_id: u64,
    source_exhausted: bool,
    stop_requested: bool,
    switches: u32,
    started: Instant,
}

impl<B: ExecutionBackend> Dispatcher<B> {
    /// Build both pools from `config`; each pool submits to its own backend
    pub fn new(primary: Arc<B>, low_latency: Arc<B>, config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let controller = Arc::new(ModeController::new(
            Pool::new(Mode::Primary, config.primary.slots, primary)?,
            Pool::new(Mode::LowLatency, config.low_latency.slots, low_latency)?,
        )?);

        let now = Instant::now();
        let mode = ModeState::new(config.initial_mode, now);
        let free = FreeSlots::for_pool(controller.pool(config.initial_mode), mode.generation());
        let shared = Arc::new(Shared::new(SchedulerState::new(mode, free)));

        log::info!("Dispatcher ready, starting in {} mode", config.initial_mode);

        Ok(Self {
            controller,
            shared,
            next_id: 0,
            expected_id: 0,
            source_exhausted: false,
            stop_requested: false,
            switches: 0,
            started: now,
        })
    }

    /// Handle for requesting a mode switch from another thread
    pub fn mode_switch(&self) -> ModeSwitch {
        ModeSwitch::new(Arc::clone(&self.shared) as Arc<dyn ToggleTarget>)
    }

    /// Handle for sampling the scheduler's accounting from another thread
    pub fn monitor(&self) -> SchedulerMonitor<B> {
        SchedulerMonitor::new(Arc::clone(&self.shared), Arc::clone(&self.controller))
    }

    pub fn active_mode(&self) -> Mode {
        self.shared.lock().mode.active()
    }

    pub fn metrics(&self, mode: Mode) -> ModeMetrics {
        *self.shared.lock().mode.metrics(mode)
    }

    pub fn pool(&self, mode: Mode) -> &Pool<B> {
        self.controller.pool(mode)
    }

    /// Pull frames from `source` until it is exhausted and every result has
    /// been delivered, the consumer stops, or a failure occurs
    ///
    /// Both pools are drained before returning, whatever the outcome.
    pub fn run<S, C>(&mut self, source: &mut S, consumer: &mut C) -> Result<RunSummary>
    where
        S: FrameSource<B::Input> + ?Sized,
        C: FrameConsumer<B::Input, B::Output> + ?Sized,
    {
        let outcome = self.run_loop(source, consumer);

        self.controller.drain_all_pools();
        let abandoned = self.shared.lock().completed.clear();
        if abandoned > 0 {
            log::warn!("Discarded {} buffered result(s) at shutdown", abandoned);
        }

        outcome?;
        let summary = self.summary(abandoned);
        summary.log();
        Ok(summary)
    }

    fn run_loop<S, C>(&mut self, source: &mut S, consumer: &mut C) -> Result<()>
    where
        S: FrameSource<B::Input> + ?Sized,
        C: FrameConsumer<B::Input, B::Output> + ?Sized,
    {
        let shared = Arc::clone(&self.shared);
        let controller = Arc::clone(&self.controller);
        let mut state = shared.lock();

        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            if self.stop_requested {
                return Ok(());
            }
            if state.mode.take_toggle_request() {
                drop(state);
                self.switch_mode(consumer)?;
                state = shared.lock();
                continue;
            }

            // Deliver
            if let Some(result) = state.completed.pop_if_next(self.expected_id) {
                let ctx = self.account(&mut state, &result);
                drop(state);
                self.hand_over(consumer, result, &ctx)?;
                state = shared.lock();
                continue;
            }

            if self.source_exhausted && self.expected_id == self.next_id {
                return Ok(());
            }

            // Admit
            let mut source_pending = false;
            if !self.source_exhausted {
                let mode = state.mode.active();
                let generation = state.mode.generation();
                let pool = controller.pool(mode);

                if let Some(slot) = pool.try_acquire(&mut state.free) {
                    drop(state);
                    let started_at = Instant::now();
                    let next = source.try_next();
                    // Only this thread flips the mode, so `generation` is still current
                    state = shared.lock();

                    match next? {
                        Next::Unit(payload) => {
                            let sequence_id = self.next_id;
                            let slot_id = slot.id();
                            let produced_in_active_mode = state.mode.active() == mode;
                            let callback_shared = Arc::clone(&shared);

                            // Submitted under the lock so slot state and admission counters move together
                            slot.submit(InputUnit::new(payload), move |payload, output, idle| {
                                let mut state = callback_shared.lock();
                                state.wallclock.tick(Instant::now());
                                match output {
                                    Ok(raw_output) => {
                                        let result = PendingResult {
                                            sequence_id,
                                            payload,
                                            raw_output,
                                            started_at,
                                            produced_in_active_mode,
                                            mode,
                                            slot: slot_id,
                                            generation,
                                        };
                                        if let Err(err) = state.completed.insert(sequence_id, result) {
                                            state.capture_failure(err);
                                        }
                                    }
                                    Err(message) => {
                                        state.capture_failure(SchedulerError::BackendFailure {
                                            sequence_id,
                                            mode,
                                            message,
                                        })
                                    }
                                }
                                // Slot idle before the dispatcher can observe the result
                                drop(idle);
                                drop(state);
                                callback_shared.notify();
                            })?;

                            state.mode.admit(mode);
                            self.next_id += 1;
                            log::debug!("Admitted frame {} to {} slot {}", sequence_id, mode, slot_id);
                            continue;
                        }
                        Next::Pending => {
                            pool.release(&mut state.free, slot.id(), generation);
                            source_pending = true;
                        }
                        Next::End => {
                            log::debug!("Source exhausted after {} frame(s)", self.next_id);
                            self.source_exhausted = true;
                            pool.release(&mut state.free, slot.id(), generation);
                            continue;
                        }
                    }
                }
            }

            // Wait
            if source_pending {
                // The lock was released while polling; re-check before sleeping
                if state.failure.is_some()
                    || state.mode.has_toggle_request()
                    || state.completed.contains(self.expected_id)
                {
                    continue;
                }
                state = shared.wait_timeout(state, SOURCE_POLL_INTERVAL);
                continue;
            }

            let busy = controller.pool(Mode::Primary).busy_count()
                + controller.pool(Mode::LowLatency).busy_count();
            if busy == 0 {
                return Err(SchedulerError::Stalled {
                    expected_id: self.expected_id,
                    mode: state.mode.active(),
                });
            }
            state = shared.wait_timeout(state, STALL_CHECK_INTERVAL);
        }
    }

    /// Drain-and-swap, delivering every result of the previous mode in between
    fn switch_mode<C>(&mut self, consumer: &mut C) -> Result<()>
    where
        C: FrameConsumer<B::Input, B::Output> + ?Sized,
    {
        let ticket = self.controller.begin_switch(&self.shared)?;
        self.switches += 1;

        // Every admitted frame has completed; buffered results are all the previous mode's
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        let mut flushed = 0usize;
        while !self.stop_requested && state.failure.is_none() {
            let Some(result) = state.completed.pop_if_next(self.expected_id) else {
                break;
            };
            let ctx = self.account(&mut state, &result);
            drop(state);
            self.hand_over(consumer, result, &ctx)?;
            flushed += 1;
            state = shared.lock();
        }
        if flushed > 0 {
            log::debug!("Flushed {} {} result(s) before switching", flushed, ticket.previous);
        }

        self.controller
            .finish_switch(&mut state, ticket, Instant::now());
        Ok(())
    }

    /// Record metrics and free the slot for the result about to be delivered
    fn account(
        &mut self,
        state: &mut SchedulerState<B::Input, B::Output>,
        result: &PendingResult<B::Input, B::Output>,
    ) -> DeliveryContext {
        let now = Instant::now();
        let latency = now.saturating_duration_since(result.started_at);
        if result.produced_in_active_mode {
            state.mode.record(result.mode, latency);
        }

        // Slots of a drained pool were already handed back by the switch
        self.controller
            .pool(result.mode)
            .release(&mut state.free, result.slot, result.generation);

        self.expected_id += 1;
        log::debug!(
            "Delivering frame {} ({} mode, {:.2} ms)",
            result.sequence_id,
            result.mode,
            latency.as_secs_f64() * 1e3
        );

        DeliveryContext {
            sequence_id: result.sequence_id,
            mode: result.mode,
            active_mode: state.mode.active(),
            metrics: *state.mode.metrics(result.mode),
            wallclock: state.wallclock.interval(),
            buffered: state.completed.len(),
            latency,
            delivered_at: now,
        }
    }

    fn hand_over<C>(
        &mut self,
        consumer: &mut C,
        result: PendingResult<B::Input, B::Output>,
        ctx: &DeliveryContext,
    ) -> Result<()>
    where
        C: FrameConsumer<B::Input, B::Output> + ?Sized,
    {
        match consumer.accept(result, ctx)? {
            Delivery::Continue => {}
            Delivery::ToggleMode => self.shared.lock().mode.request_toggle(),
            Delivery::Stop => {
                log::info!("Consumer requested stop after frame {}", ctx.sequence_id);
                self.stop_requested = true;
            }
        }
        Ok(())
    }

    fn summary(&self, abandoned: usize) -> RunSummary {
        let now = Instant::now();
        let state = self.shared.lock();
        let modes = Mode::ALL
            .iter()
            .map(|&mode| state.mode.metrics(mode).report(mode, now))
            .filter(|report| report.frames > 0)
            .collect();

        RunSummary {
            frames_admitted: self.next_id,
            frames_delivered: self.expected_id,
            frames_abandoned: abandoned,
            switches: self.switches,
            final_mode: state.mode.active(),
            stopped_by_consumer: self.stop_requested,
            elapsed_secs: now.saturating_duration_since(self.started).as_secs_f64(),
            wallclock_fps: state.wallclock.fps(),
            modes,
        }
    }
}
