//! Priority queue of waiting task ids.
//!
//! Ordering: priority rank descending, then creation sequence ascending.
//! The queue holds `TaskId`s only; records live in the pool registry.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::domain::{Priority, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    rank: u8,
    sequence: u64,
    task_id: TaskId,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher rank first, then earlier sequence. task_id only breaks ties
        // that cannot happen with unique sequences, but keeps Ord total.
        other
            .rank
            .cmp(&self.rank)
            .then(self.sequence.cmp(&other.sequence))
            .then(self.task_id.cmp(&other.task_id))
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    ordered: BTreeSet<QueueEntry>,
    index: HashMap<TaskId, QueueEntry>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. Re-inserting an id replaces its previous position.
    pub fn push(&mut self, task_id: TaskId, priority: Priority, sequence: u64) {
        self.remove(task_id);
        let entry = QueueEntry {
            rank: priority.rank(),
            sequence,
            task_id,
        };
        self.ordered.insert(entry);
        self.index.insert(task_id, entry);
    }

    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.index.remove(&task_id) {
            Some(entry) => self.ordered.remove(&entry),
            None => false,
        }
    }

    /// Ids in queue order. Returned as an owned snapshot so the caller can
    /// mutate the queue while walking it.
    pub fn ordered_ids(&self) -> Vec<TaskId> {
        self.ordered.iter().map(|e| e.task_id).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
