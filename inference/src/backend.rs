//! Execution backend seam
//!
//! Worker slots hand frames to a backend and learn about the result through a
//! completion closure the backend invokes on one of its own threads. Any
//! model that implements `InferenceModel` can be wrapped in a
//! `StreamExecutor` to become a backend.

/// Completion closure: receives the input back together with the model output
pub type Completion<I, O> = Box<dyn FnOnce(I, Result<O, String>) + Send + 'static>;

/// Common interface for asynchronous execution engines
pub trait ExecutionBackend: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Start processing `input` without blocking the caller.
    ///
    /// `done` must be invoked exactly once, and never from inside
    /// `start_async` itself: the dispatcher submits while holding the lock the
    /// completion takes. Dropping it without calling it (e.g. during
    /// shutdown) is tolerated: the slot still returns to idle.
    fn start_async(&self, input: Self::Input, done: Completion<Self::Input, Self::Output>);

    /// Get the backend name (for logging/debugging)
    fn name(&self) -> &str;
}

/// Common interface for inference models
pub trait InferenceModel: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Run the model on a single input
    fn infer(&self, input: &Self::Input) -> Result<Self::Output, String>;

    /// Get the model name (for logging/debugging)
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_alias_accepts_boxed_closure() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = std::sync::Arc::clone(&seen);
        let done: Completion<u32, u32> = Box::new(move |input, output| {
            *sink.lock().unwrap() = Some((input, output));
        });

        done(3, Ok(9));
        assert_eq!(*seen.lock().unwrap(), Some((3, Ok(9))));
    }
}
