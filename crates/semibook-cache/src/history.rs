//! Per-block checkpoint ring buffer for reorg recovery
//!
//! Before the first log of a new block is applied, the semibook pushes a
//! checkpoint holding its state tagged with that block. Rolling back to block
//! `B` means restoring the checkpoint of the earliest retained block above
//! `B`: that state reflects everything up to `B` and nothing after it.

use semibook_types::BlockNumber;
use std::collections::VecDeque;

/// State captured just before a block was applied
#[derive(Debug, Clone)]
pub struct Checkpoint<T> {
    /// Block about to be applied when the checkpoint was taken
    pub block: BlockNumber,
    /// State before that block
    pub state: T,
}

/// Outcome of a restore request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome<T> {
    /// State consistent with the target block
    Restored(T),
    /// No retained checkpoint lies above the target
    NothingToUndo,
    /// The needed checkpoint was evicted
    Unavailable,
}

/// Bounded buffer of checkpoints, oldest first
#[derive(Debug, Clone)]
pub struct CheckpointHistory<T> {
    checkpoints: VecDeque<Checkpoint<T>>,
    max_size: usize,
    /// Block of the most recently evicted checkpoint
    evicted_through: Option<BlockNumber>,
}

impl<T: Clone> CheckpointHistory<T> {
    /// Create a buffer retaining at most `max_size` checkpoints
    pub fn new(max_size: usize) -> Self {
        Self {
            checkpoints: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            evicted_through: None,
        }
    }

    /// Push a checkpoint, evicting the oldest if the buffer is full
    pub fn push(&mut self, block: BlockNumber, state: T) {
        if self.max_size == 0 {
            self.evicted_through = Some(block);
            return;
        }
        if self.checkpoints.len() >= self.max_size {
            if let Some(evicted) = self.checkpoints.pop_front() {
                self.evicted_through = Some(evicted.block);
            }
        }
        self.checkpoints.push_back(Checkpoint { block, state });
    }

    /// Restore the state as of `target` and drop every later checkpoint
    pub fn restore(&mut self, target: BlockNumber) -> RestoreOutcome<T> {
        let evicted_above_target = self.evicted_through.map_or(false, |b| b > target);

        match self.checkpoints.iter().position(|c| c.block > target) {
            Some(0) if evicted_above_target => RestoreOutcome::Unavailable,
            Some(index) => {
                let state = self.checkpoints[index].state.clone();
                self.checkpoints.truncate(index);
                RestoreOutcome::Restored(state)
            }
            None if evicted_above_target => RestoreOutcome::Unavailable,
            None => RestoreOutcome::NothingToUndo,
        }
    }

    /// Number of retained checkpoints
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Maximum number of retained checkpoints
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Block of the oldest retained checkpoint
    pub fn oldest_block(&self) -> Option<BlockNumber> {
        self.checkpoints.front().map(|c| c.block)
    }

    /// Block of the newest retained checkpoint
    pub fn latest_block(&self) -> Option<BlockNumber> {
        self.checkpoints.back().map(|c| c.block)
    }

    /// Drop all checkpoints (after a fresh snapshot)
    pub fn clear(&mut self) {
        self.checkpoints.clear();
        self.evicted_through = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_earliest_above_target() {
        let mut history = CheckpointHistory::new(10);
        history.push(11, "before 11");
        history.push(12, "before 12");
        history.push(14, "before 14");

        assert_eq!(history.restore(12), RestoreOutcome::Restored("before 14"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest_block(), Some(12));

        assert_eq!(history.restore(10), RestoreOutcome::Restored("before 11"));
        assert!(history.is_empty());
    }

    #[test]
    fn test_nothing_to_undo() {
        let mut history = CheckpointHistory::new(10);
        history.push(5, 0u32);
        assert_eq!(history.restore(5), RestoreOutcome::NothingToUndo);
        assert_eq!(history.restore(9), RestoreOutcome::NothingToUndo);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_evicted_checkpoint_unavailable() {
        let mut history = CheckpointHistory::new(2);
        history.push(1, 'a');
        history.push(2, 'b');
        history.push(3, 'c');
        assert_eq!(history.oldest_block(), Some(2));

        // Rolling back to 0 needs the evicted checkpoint of block 1
        assert_eq!(history.restore(0), RestoreOutcome::Unavailable);
        // Rolling back to 1 only needs block 2's checkpoint
        assert_eq!(history.restore(1), RestoreOutcome::Restored('b'));
    }

    #[test]
    fn test_zero_capacity_never_restores() {
        let mut history = CheckpointHistory::new(0);
        history.push(4, ());
        assert!(history.is_empty());
        assert_eq!(history.restore(3), RestoreOutcome::Unavailable);
        assert_eq!(history.restore(4), RestoreOutcome::NothingToUndo);
    }

    #[test]
    fn test_clear_resets_eviction() {
        let mut history = CheckpointHistory::new(1);
        history.push(1, 1);
        history.push(2, 2);
        history.clear();
        assert_eq!(history.restore(0), RestoreOutcome::NothingToUndo);
    }
}
