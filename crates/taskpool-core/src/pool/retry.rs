//! Retry policy: decides what happens to a failed task.
//!
//! Retries are immediate (no backoff): a retried task goes straight back to
//! the pending queue and is offered to agents in the same turn.

use crate::domain::TaskRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

/// What to do with a task that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Requeue; `retry` is the 1-based retry number about to start.
    Retry { retry: u32 },

    /// Retries exhausted, keep the task failed.
    GiveUp { attempts: u32 },
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Retries `task` may use: its own override, else the pool default.
    pub fn limit_for(&self, task: &TaskRecord) -> u32 {
        task.max_retries.unwrap_or(self.max_retries)
    }

    pub fn decide(&self, task: &TaskRecord) -> FailureDecision {
        if task.retry_count < self.limit_for(task) {
            FailureDecision::Retry {
                retry: task.retry_count + 1,
            }
        } else {
            FailureDecision::GiveUp {
                attempts: task.attempts,
            }
        }
    }
}
