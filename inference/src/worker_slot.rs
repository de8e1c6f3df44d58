//! A single unit of execution capacity.
//!
//! A slot accepts one frame at a time, forwards it to its backend and runs
//! the registered completion callback on the backend's thread. The callback
//! receives an `IdleToken`; the slot becomes idle when the token is dropped,
//! which happens no later than the callback returning.

use std::sync::{Arc, Condvar, Mutex};

use crate::backend::ExecutionBackend;
use crate::error::{Result, SchedulerError};
use crate::sync::{lock, wait};
use crate::types::{InputUnit, Mode, SlotId};

#[derive(Default)]
struct SlotState {
    busy: Mutex<bool>,
    idle: Condvar,
}

/// Marks its slot idle when dropped.
///
/// Dropping the token while still holding the scheduler lock guarantees the
/// dispatcher never sees a completed result whose slot still looks busy.
pub struct IdleToken {
    state: Arc<SlotState>,
}

impl Drop for IdleToken {
    fn drop(&mut self) {
        *lock(&self.state.busy) = false;
        self.state.idle.notify_all();
    }
}

/// One worker slot bound to a backend and a mode
pub struct WorkerSlot<B: ExecutionBackend> {
    id: SlotId,
    mode: Mode,
    backend: Arc<B>,
    state: Arc<SlotState>,
}

impl<B: ExecutionBackend> WorkerSlot<B> {
    pub fn new(id: SlotId, mode: Mode, backend: Arc<B>) -> Self {
        Self {
            id,
            mode,
            backend,
            state: Arc::new(SlotState::default()),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_busy(&self) -> bool {
        *lock(&self.state.busy)
    }

    /// Start processing `unit`; `on_complete` runs exactly once on a backend thread.
    ///
    /// # Errors
    ///
    /// `AlreadyBusy` if the previous submission has not completed yet.
    pub fn submit<F>(&self, unit: InputUnit<B::Input>, on_complete: F) -> Result<()>
    where
        F: FnOnce(InputUnit<B::Input>, std::result::Result<B::Output, String>, IdleToken)
            + Send
            + 'static,
    {
        {
            let mut busy = lock(&self.state.busy);
            if *busy {
                return Err(SchedulerError::AlreadyBusy {
                    slot: self.id,
                    mode: self.mode,
                });
            }
            *busy = true;
        }

        // Moved into the completion so an abandoned completion still frees the slot
        let token = IdleToken {
            state: Arc::clone(&self.state),
        };
        let InputUnit {
            payload,
            dispatched_at,
        } = unit;

        self.backend.start_async(
            payload,
            Box::new(move |payload, output| {
                on_complete(
                    InputUnit {
                        payload,
                        dispatched_at,
                    },
                    output,
                    token,
                );
            }),
        );
        Ok(())
    }

    /// Block until the in-flight submission, if any, has completed.
    pub fn await_idle(&self) {
        let mut busy = lock(&self.state.busy);
        while *busy {
            busy = wait(&self.state.idle, busy);
        }
    }
}
