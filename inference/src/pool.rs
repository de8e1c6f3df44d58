/// Fixed-size pool of worker slots sharing one mode
///
/// The pool owns its slots; which of them may receive a frame is tracked by a
/// `FreeSlots` set that lives in the scheduler's lock-protected state. Only
/// the active pool has a free set at any time.
use crate::backend::ExecutionBackend;
use crate::error::{Result, SchedulerError};
use crate::types::{Mode, SlotId};
use crate::worker_slot::WorkerSlot;
use std::collections::VecDeque;
use std::sync::Arc;

/// Free slots of the active pool, tagged with the mode generation that built them
#[derive(Debug, Clone)]
pub struct FreeSlots {
    mode: Mode,
    generation: u64,
    ids: VecDeque<SlotId>,
}

impl FreeSlots {
    /// Free set containing every slot of `pool`
    pub fn for_pool<B: ExecutionBackend>(pool: &Pool<B>, generation: u64) -> Self {
        Self {
            mode: pool.mode(),
            generation,
            ids: (0..pool.len()).collect(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Worker pool for one mode
pub struct Pool<B: ExecutionBackend> {
    mode: Mode,
    slots: Vec<WorkerSlot<B>>,
}

impl<B: ExecutionBackend> Pool<B> {
    /// Create a pool of `size` slots that all submit to `backend`
    pub fn new(mode: Mode, size: usize, backend: Arc<B>) -> Result<Self> {
        if size == 0 {
            return Err(SchedulerError::config(format!(
                "{} pool needs at least one slot",
                mode
            )));
        }

        let slots = (0..size)
            .map(|id| WorkerSlot::new(id, mode, Arc::clone(&backend)))
            .collect();

        log::info!(
            "Created {} pool: {} slot(s) on backend '{}'",
            mode,
            size,
            backend.name()
        );

        Ok(Pool { mode, slots })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: SlotId) -> Option<&WorkerSlot<B>> {
        self.slots.get(id)
    }

    /// Take a free slot without blocking
    ///
    /// Returns None when the free set is exhausted or belongs to the other pool.
    pub fn try_acquire(&self, free: &mut FreeSlots) -> Option<&WorkerSlot<B>> {
        if free.mode != self.mode {
            return None;
        }
        free.ids.pop_front().and_then(|id| self.slots.get(id))
    }

    /// Return a slot to the free set
    ///
    /// Ignored (returns false) when the free set was rebuilt for another mode
    /// or a later generation since the slot was acquired: a switch already
    /// accounted for every slot of the new pool.
    pub fn release(&self, free: &mut FreeSlots, slot: SlotId, generation: u64) -> bool {
        if free.mode != self.mode || free.generation != generation || slot >= self.slots.len() {
            return false;
        }
        if free.ids.contains(&slot) {
            log::error!("Slot {} of the {} pool released twice", slot, self.mode);
            return false;
        }
        free.ids.push_back(slot);
        true
    }

    /// Block until every slot of the pool is idle
    pub fn drain_all(&self) {
        for slot in &self.slots {
            slot.await_idle();
        }
    }

    /// Number of slots with a submission in flight
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_busy()).count()
    }

    /// First busy slot, if any
    pub fn first_busy(&self) -> Option<SlotId> {
        self.slots.iter().find(|slot| slot.is_busy()).map(WorkerSlot::id)
    }
}
