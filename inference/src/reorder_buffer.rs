//! Reordering buffer for out-of-order frame completion.
//!
//! Workers finish frames in any order; the buffer holds completed results
//! keyed by sequence id until the dispatcher's cursor reaches them.
//!
//! # Example
//!
//! ```
//! use frame_scheduler::reorder_buffer::ReorderBuffer;
//!
//! let mut buffer: ReorderBuffer<&str> = ReorderBuffer::new();
//! buffer.insert(1, "second").unwrap();
//! assert_eq!(buffer.pop_if_next(0), None);
//!
//! buffer.insert(0, "first").unwrap();
//! assert_eq!(buffer.pop_if_next(0), Some("first"));
//! assert_eq!(buffer.pop_if_next(1), Some("second"));
//! ```

use std::collections::BTreeMap;

use crate::error::{Result, SchedulerError};

/// Completed items keyed by sequence id.
///
/// The buffer does not track the cursor itself: the caller owns the next
/// expected id and advances it exactly when `pop_if_next` succeeds. The
/// buffer is unbounded; callers bound it by bounding admissions.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    /// Create an empty reorder buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// Buffer a completed item.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSequenceId` if an item with the same id is already
    /// buffered; the buffer is left unchanged.
    pub fn insert(&mut self, sequence_id: u64, item: T) -> Result<()> {
        if self.pending.contains_key(&sequence_id) {
            return Err(SchedulerError::DuplicateSequenceId { sequence_id });
        }
        self.pending.insert(sequence_id, item);
        Ok(())
    }

    /// Remove and return the item for `expected_id` if it has completed.
    ///
    /// Returns `None` without touching the buffer otherwise, so polling an id
    /// that has not arrived yet is side-effect free.
    pub fn pop_if_next(&mut self, expected_id: u64) -> Option<T> {
        debug_assert!(
            self.pending
                .keys()
                .next()
                .map_or(true, |&first| first >= expected_id),
            "Reorder buffer holds ids older than the cursor {expected_id}"
        );
        self.pending.remove(&expected_id)
    }

    /// Check whether `sequence_id` is buffered.
    #[must_use]
    pub fn contains(&self, sequence_id: u64) -> bool {
        self.pending.contains_key(&sequence_id)
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffered items in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.pending.iter().map(|(&id, item)| (id, item))
    }

    /// Drop everything still buffered, returning how many items were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_insertion() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();

        buffer.insert(0, 100).unwrap();
        buffer.insert(1, 200).unwrap();

        assert_eq!(buffer.pop_if_next(0), Some(100));
        assert_eq!(buffer.pop_if_next(1), Some(200));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_out_of_order_insertion() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();

        buffer.insert(2, 300).unwrap();
        buffer.insert(1, 200).unwrap();
        assert_eq!(buffer.pop_if_next(0), None);

        buffer.insert(0, 100).unwrap();
        let drained: Vec<_> = (0..3).map_while(|id| buffer.pop_if_next(id)).collect();
        assert_eq!(drained, vec![100, 200, 300]);
    }

    #[test]
    fn test_gap_blocks_progress() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();

        buffer.insert(0, 100).unwrap();
        buffer.insert(2, 300).unwrap(); // Gap at 1

        assert_eq!(buffer.pop_if_next(0), Some(100));
        assert_eq!(buffer.pop_if_next(1), None);
        assert_eq!(buffer.len(), 1);

        buffer.insert(1, 200).unwrap();
        assert_eq!(buffer.pop_if_next(1), Some(200));
        assert_eq!(buffer.pop_if_next(2), Some(300));
    }

    #[test]
    fn test_pop_of_missing_id_is_idempotent() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();
        buffer.insert(5, 500).unwrap();

        for _ in 0..10 {
            assert_eq!(buffer.pop_if_next(3), None);
        }
        assert_eq!(buffer.len(), 1);
        assert!(buffer.contains(5));
        assert!(!buffer.contains(3));
    }

    #[test]
    fn test_duplicate_sequence_id_rejected() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();
        buffer.insert(7, 1).unwrap();

        let err = buffer.insert(7, 2).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::DuplicateSequenceId { sequence_id: 7 }
        ));
        // The original entry survives
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pop_if_next(7), Some(1));
    }

    #[test]
    fn test_iter_is_sequence_ordered() {
        let mut buffer: ReorderBuffer<char> = ReorderBuffer::new();
        buffer.insert(9, 'c').unwrap();
        buffer.insert(4, 'a').unwrap();
        buffer.insert(6, 'b').unwrap();

        let items: Vec<(u64, char)> = buffer.iter().map(|(id, item)| (id, *item)).collect();
        assert_eq!(items, vec![(4, 'a'), (6, 'b'), (9, 'c')]);
    }

    #[test]
    fn test_clear_reports_discarded() {
        let mut buffer: ReorderBuffer<i32> = ReorderBuffer::new();
        buffer.insert(3, 1).unwrap();
        buffer.insert(4, 2).unwrap();

        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }
}
