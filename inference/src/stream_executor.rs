/// Stream executor - tokio-backed asynchronous execution backend
///
/// Runs an `InferenceModel` on a dedicated runtime:
/// - The blocking pool is capped at the configured stream count, so at most
///   that many frames are computed concurrently
/// - Completion closures run on the runtime's threads, never on the caller's
/// - A panicking model is reported as a failed frame instead of wedging a slot
use crate::backend::{Completion, ExecutionBackend, InferenceModel};
use crate::error::{Result, SchedulerError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Execution backend that runs a model on a bounded tokio blocking pool
pub struct StreamExecutor<M: InferenceModel> {
    model: Arc<M>,
    name: String,
    streams: usize,
    runtime: Runtime,
}

impl<M: InferenceModel> StreamExecutor<M> {
    /// Create a new stream executor with its own tokio runtime
    pub fn new(model: Arc<M>, streams: usize, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if streams == 0 {
            return Err(SchedulerError::config(format!(
                "executor '{}' needs at least one stream",
                name
            )));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(streams)
            .thread_name(format!("{}-stream", name))
            .build()?;

        log::info!(
            "Stream executor '{}' ready: model {}, {} stream(s)",
            name,
            model.name(),
            streams
        );

        Ok(StreamExecutor {
            model,
            name,
            streams,
            runtime,
        })
    }

    /// Number of frames that can be computed concurrently
    pub fn streams(&self) -> usize {
        self.streams
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }
}

impl<M: InferenceModel> ExecutionBackend for StreamExecutor<M> {
    type Input = M::Input;
    type Output = M::Output;

    fn start_async(&self, input: Self::Input, done: Completion<Self::Input, Self::Output>) {
        let model = Arc::clone(&self.model);
        self.runtime.spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| model.infer(&input)))
                .unwrap_or_else(|_| Err(format!("model {} panicked", model.name())));
            done(input, result);
        });
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    struct Doubler;

    impl InferenceModel for Doubler {
        type Input = u32;
        type Output = u32;

        fn infer(&self, input: &u32) -> std::result::Result<u32, String> {
            if *input == 13 {
                panic!("unlucky frame");
            }
            Ok(input * 2)
        }

        fn name(&self) -> &str {
            "doubler"
        }
    }

    #[test]
    fn test_zero_streams_rejected() {
        let result = StreamExecutor::new(Arc::new(Doubler), 0, "empty");
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_completion_runs_off_caller_thread() {
        let executor = StreamExecutor::new(Arc::new(Doubler), 2, "test").unwrap();
        let caller = std::thread::current().id();
        let (tx, rx) = channel();

        executor.start_async(
            21,
            Box::new(move |input, output| {
                let _ = tx.send((input, output, std::thread::current().id()));
            }),
        );

        let (input, output, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(input, 21);
        assert_eq!(output, Ok(42));
        assert_ne!(thread, caller);
        assert_eq!(executor.streams(), 2);
    }

    #[test]
    fn test_model_panic_becomes_error() {
        let executor = StreamExecutor::new(Arc::new(Doubler), 1, "test").unwrap();
        let (tx, rx) = channel();

        executor.start_async(
            13,
            Box::new(move |_, output| {
                let _ = tx.send(output);
            }),
        );

        let output = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(output.unwrap_err().contains("panicked"));
    }
}
