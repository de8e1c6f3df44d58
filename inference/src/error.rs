//! Error types for the frame scheduler

use thiserror::Error;

use crate::types::{Mode, SlotId};

/// Result type alias for the scheduler
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur while scheduling frames
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Worker slot {slot} of the {mode} pool is already busy")]
    AlreadyBusy { slot: SlotId, mode: Mode },

    #[error("Sequence id {sequence_id} is already buffered")]
    DuplicateSequenceId { sequence_id: u64 },

    #[error("Backend failed on frame {sequence_id} ({mode} mode): {message}")]
    BackendFailure {
        sequence_id: u64,
        mode: Mode,
        message: String,
    },

    #[error("Scheduler stalled waiting for frame {expected_id} ({mode} mode): nothing in flight")]
    Stalled { expected_id: u64, mode: Mode },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn frame_source<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }

    pub fn consumer<S: Into<String>>(msg: S) -> Self {
        Self::Consumer(msg.into())
    }

    /// Invariant violations abort the run instead of being retried
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyBusy { .. } | Self::DuplicateSequenceId { .. }
        )
    }
}
