//! Bounded checkpoint history for undo

use crate::state::StateSnapshot;
use std::collections::VecDeque;

/// Most recent checkpoints, oldest evicted first
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    snapshots: VecDeque<StateSnapshot>,
}

impl SnapshotHistory {
    /// A capacity of 0 keeps nothing
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    /// Store a checkpoint; returns false when history is disabled
    pub fn push(&mut self, snapshot: StateSnapshot) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.snapshots.push_back(snapshot);
        self.enforce_limits();
        true
    }

    pub fn pop(&mut self) -> Option<StateSnapshot> {
        self.snapshots.pop_back()
    }

    pub fn latest(&self) -> Option<&StateSnapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    fn enforce_limits(&mut self) {
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }
}
