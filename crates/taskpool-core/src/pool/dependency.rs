//! Reverse dependency index: for each task, the tasks that listed it as a
//! dependency.
//!
//! A task's own dependency list lives on its record; the pool only needs the
//! reverse direction to know whom to re-check when a task completes. Entries
//! are kept after completion so a later re-check still finds the dependents.

use std::collections::{BTreeSet, HashMap};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct Dependents {
    by_dependency: HashMap<TaskId, BTreeSet<TaskId>>,
}

impl Dependents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` waits on each of `dependencies`.
    pub fn record<'a>(
        &mut self,
        dependent: TaskId,
        dependencies: impl IntoIterator<Item = &'a TaskId>,
    ) {
        for dependency in dependencies {
            self.by_dependency
                .entry(*dependency)
                .or_default()
                .insert(dependent);
        }
    }

    /// Every task that waits on `dependency`, whether or not its other
    /// dependencies are done.
    pub fn of(&self, dependency: TaskId) -> Vec<TaskId> {
        self.by_dependency
            .get(&dependency)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
