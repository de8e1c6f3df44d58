//! Frame Scheduler Library
//!
//! Asynchronous dispatch-and-reorder scheduling for video inference. Frames
//! are admitted into a pool of asynchronous worker slots, complete out of
//! order on backend threads and are delivered to the consumer strictly in
//! capture order. The run can switch between a throughput-oriented pool and
//! a latency-oriented pool at any time without losing in-flight frames.

pub mod backend;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod mode_controller;
pub mod monitor;
pub mod pool;
pub mod reorder_buffer;
pub mod simulated;
pub mod source;
pub mod stream_executor;
pub mod types;
pub mod worker_slot;

mod state;
mod sync;

#[cfg(test)]
mod testutil;

pub use backend::{Completion, ExecutionBackend, InferenceModel};
pub use config::{PoolConfig, SchedulerConfig};
pub use detection::{Detection, Labels, PixelBox, SsdDecoder};
pub use dispatcher::{Delivery, DeliveryContext, Dispatcher, FrameConsumer, RunSummary};
pub use error::{Result, SchedulerError};
pub use metrics::{ModeMetrics, ModeReport, WallclockMeter};
pub use mode_controller::ModeSwitch;
pub use monitor::{ModeSnapshot, SchedulerMonitor, SchedulerSnapshot};
pub use reorder_buffer::ReorderBuffer;
pub use source::{ChannelSource, FrameSource, Next};
pub use stream_executor::StreamExecutor;
pub use types::{InputUnit, Mode, PendingResult, SlotId};

/// Initialize the scheduler library
pub fn init() -> Result<()> {
    log::info!("Frame scheduler {} initialized", version());
    Ok(())
}

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
