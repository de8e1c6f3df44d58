//! Test doubles shared by the unit tests.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::backend::{Completion, ExecutionBackend};
use crate::sync::lock;

const PENDING_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend whose completions are fired by the test, in whatever order it likes.
pub(crate) struct ManualBackend<I, O> {
    name: String,
    pending: Mutex<Vec<(I, Completion<I, O>)>>,
    arrived: Condvar,
}

impl<I: Send + 'static, O: Send + 'static> ManualBackend<I, O> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pending: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        }
    }

    pub(crate) fn pending_inputs(&self) -> Vec<I>
    where
        I: Clone,
    {
        lock(&self.pending)
            .iter()
            .map(|(input, _)| input.clone())
            .collect()
    }

    /// Block until at least `count` submissions are waiting for completion.
    pub(crate) fn wait_for_pending(&self, count: usize) {
        let deadline = Instant::now() + PENDING_TIMEOUT;
        let mut pending = lock(&self.pending);
        while pending.len() < count {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {count} pending submissions"));
            pending = self
                .arrived
                .wait_timeout(pending, remaining)
                .unwrap()
                .0;
        }
    }

    /// Complete the first pending submission matching `select`, on the calling thread.
    pub(crate) fn complete<S, F>(&self, select: S, output: F)
    where
        S: Fn(&I) -> bool,
        F: FnOnce(&I) -> Result<O, String>,
    {
        let (input, done) = {
            let mut pending = lock(&self.pending);
            let index = pending
                .iter()
                .position(|(input, _)| select(input))
                .expect("no pending submission matches");
            pending.remove(index)
        };
        let output = output(&input);
        done(input, output);
    }

    /// Drop every pending completion without calling it.
    pub(crate) fn abandon_all(&self) {
        let abandoned: Vec<_> = lock(&self.pending).drain(..).collect();
        drop(abandoned);
    }
}

impl<I: Send + 'static, O: Send + 'static> ExecutionBackend for ManualBackend<I, O> {
    type Input = I;
    type Output = O;

    fn start_async(&self, input: I, done: Completion<I, O>) {
        lock(&self.pending).push((input, done));
        self.arrived.notify_all();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
