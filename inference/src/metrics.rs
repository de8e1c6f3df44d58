//! Per-mode performance accounting.
//!
//! Each mode keeps a window that opens when the mode becomes active and
//! closes when the run switches away from it. Windowed FPS is
//! `frames_completed / window length`; mean latency is measured from
//! admission to delivery. The wallclock meter smooths the interval between
//! consecutive completions with an exponential moving average.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::types::Mode;

/// Weight of the newest interval in the wallclock moving average
pub const WALLCLOCK_SMOOTHING: f64 = 0.1;

/// Running metrics for one mode's current window
#[derive(Debug, Clone, Copy)]
pub struct ModeMetrics {
    /// Frames handed to this mode's pool since the window opened
    pub frames_admitted: u64,
    pub frames_completed: u64,
    pub latency_sum: Duration,
    pub window_start: Instant,
    pub window_end: Option<Instant>,
}

impl ModeMetrics {
    /// Fresh window starting at `now`
    pub fn start(now: Instant) -> Self {
        Self {
            frames_admitted: 0,
            frames_completed: 0,
            latency_sum: Duration::ZERO,
            window_start: now,
            window_end: None,
        }
    }

    pub fn admit(&mut self) {
        self.frames_admitted += 1;
    }

    pub fn record(&mut self, latency: Duration) {
        self.frames_completed += 1;
        self.latency_sum += latency;
    }

    pub fn close(&mut self, now: Instant) {
        self.window_end = Some(now);
    }

    pub fn is_open(&self) -> bool {
        self.window_end.is_none()
    }

    /// Length of the window, measured up to `now` while it is still open
    pub fn window(&self, now: Instant) -> Duration {
        self.window_end
            .unwrap_or(now)
            .saturating_duration_since(self.window_start)
    }

    /// Frames per second over the window
    pub fn fps(&self, now: Instant) -> f64 {
        let secs = self.window(now).as_secs_f64();
        if self.frames_completed == 0 || secs <= 0.0 {
            0.0
        } else {
            self.frames_completed as f64 / secs
        }
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        if self.frames_completed == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            self.latency_sum.as_secs_f64() / self.frames_completed as f64,
        ))
    }

    pub fn report(&self, mode: Mode, now: Instant) -> ModeReport {
        ModeReport {
            mode,
            admitted: self.frames_admitted,
            frames: self.frames_completed,
            fps: self.fps(now),
            mean_latency_ms: self
                .mean_latency()
                .map_or(0.0, |latency| latency.as_secs_f64() * 1e3),
            window_secs: self.window(now).as_secs_f64(),
        }
    }
}

/// Serializable summary of one mode window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeReport {
    pub mode: Mode,
    pub admitted: u64,
    pub frames: u64,
    pub fps: f64,
    pub mean_latency_ms: f64,
    pub window_secs: f64,
}

/// Smoothed interval between consecutive completions, across both modes
#[derive(Debug, Clone, Copy, Default)]
pub struct WallclockMeter {
    last: Option<Instant>,
    smoothed: Option<Duration>,
}

impl WallclockMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion at `now`
    pub fn tick(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let interval = now.saturating_duration_since(last).as_secs_f64();
            let smoothed = match self.smoothed {
                Some(previous) => {
                    WALLCLOCK_SMOOTHING * interval
                        + (1.0 - WALLCLOCK_SMOOTHING) * previous.as_secs_f64()
                }
                None => interval,
            };
            self.smoothed = Some(Duration::from_secs_f64(smoothed));
        }
        self.last = Some(now);
    }

    /// Smoothed interval, once two completions have been seen
    pub fn interval(&self) -> Option<Duration> {
        self.smoothed
    }

    pub fn fps(&self) -> Option<f64> {
        self.smoothed
            .filter(|interval| !interval.is_zero())
            .map(|interval| 1.0 / interval.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_window_is_empty() {
        let now = Instant::now();
        let metrics = ModeMetrics::start(now);

        assert_eq!(metrics.frames_admitted, 0);
        assert_eq!(metrics.frames_completed, 0);
        assert!(metrics.is_open());
        assert_eq!(metrics.mean_latency(), None);
        assert_eq!(metrics.fps(now + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_fps_and_latency_over_closed_window() {
        let start = Instant::now();
        let mut metrics = ModeMetrics::start(start);
        for _ in 0..10 {
            metrics.admit();
            metrics.record(Duration::from_millis(40));
        }
        metrics.close(start + Duration::from_secs(2));

        // Closed windows ignore `now`
        let later = start + Duration::from_secs(100);
        assert!((metrics.fps(later) - 5.0).abs() < 1e-9);
        assert_eq!(metrics.mean_latency(), Some(Duration::from_millis(40)));

        let report = metrics.report(Mode::LowLatency, later);
        assert_eq!(report.admitted, 10);
        assert_eq!(report.frames, 10);
        assert!((report.mean_latency_ms - 40.0).abs() < 1e-6);
        assert!((report.window_secs - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_wallclock_needs_two_ticks() {
        let start = Instant::now();
        let mut meter = WallclockMeter::new();

        meter.tick(start);
        assert_eq!(meter.interval(), None);

        meter.tick(start + Duration::from_millis(100));
        assert_eq!(meter.interval(), Some(Duration::from_millis(100)));
        assert!((meter.fps().unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_wallclock_is_smoothed() {
        let start = Instant::now();
        let mut meter = WallclockMeter::new();
        meter.tick(start);
        meter.tick(start + Duration::from_millis(100));
        // A single long gap moves the average by the smoothing weight only
        meter.tick(start + Duration::from_millis(1100));

        let interval = meter.interval().unwrap().as_secs_f64();
        assert!((interval - 0.19).abs() < 1e-6);
    }
}
