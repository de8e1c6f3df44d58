//! Frame sources feeding the dispatcher.

use crossbeam::channel::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use crate::error::{Result, SchedulerError};

/// Outcome of polling a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next<T> {
    Unit(T),
    /// Nothing ready yet; poll again later
    Pending,
    /// The stream is over
    End,
}

impl<T> Next<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Next<U> {
        match self {
            Next::Unit(unit) => Next::Unit(f(unit)),
            Next::Pending => Next::Pending,
            Next::End => Next::End,
        }
    }
}

impl<T> From<Option<T>> for Next<T> {
    fn from(unit: Option<T>) -> Self {
        match unit {
            Some(unit) => Next::Unit(unit),
            None => Next::End,
        }
    }
}

/// Supplies input units without blocking
///
/// The dispatcher polls from its control thread, so an implementation must
/// return `Next::Pending` rather than wait for a unit to arrive.
pub trait FrameSource<T> {
    fn try_next(&mut self) -> Result<Next<T>>;
}

/// Closures are always ready: `Ok(None)` ends the stream
impl<T, F> FrameSource<T> for F
where
    F: FnMut() -> Result<Option<T>>,
{
    fn try_next(&mut self) -> Result<Next<T>> {
        self().map(Next::from)
    }
}

/// Source reading frames from a crossbeam channel
///
/// The stream ends when every sender is dropped. An optional idle timeout
/// turns a producer that stays silent for too long into a source error.
pub struct ChannelSource<T> {
    rx: Receiver<T>,
    idle_timeout: Option<Duration>,
    last_unit: Instant,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: Receiver<T>) -> Self {
        Self {
            rx,
            idle_timeout: None,
            last_unit: Instant::now(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

impl<T> FrameSource<T> for ChannelSource<T> {
    fn try_next(&mut self) -> Result<Next<T>> {
        match self.rx.try_recv() {
            Ok(frame) => {
                self.last_unit = Instant::now();
                Ok(Next::Unit(frame))
            }
            Err(TryRecvError::Disconnected) => Ok(Next::End),
            Err(TryRecvError::Empty) => match self.idle_timeout {
                Some(timeout) if self.last_unit.elapsed() > timeout => {
                    Err(SchedulerError::frame_source(format!(
                        "no frame within {} ms",
                        timeout.as_millis()
                    )))
                }
                _ => Ok(Next::Pending),
            },
        }
    }
}
