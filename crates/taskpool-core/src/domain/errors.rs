//! Errors surfaced by pool commands.
//!
//! None of these are fatal: the pool state is left unchanged when a command
//! returns an error.

use thiserror::Error;

use super::ids::{AgentId, TaskId};
use super::task::TaskStatus;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("agent {0} cannot take more work")]
    AgentUnavailable(AgentId),

    #[error("invalid status update for {task_id}: {from} -> {to}")]
    InvalidStatusUpdate {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("context propagation failed for {context_hash}: {message}")]
    Context {
        context_hash: String,
        message: String,
    },
}

impl PoolError {
    /// Stale reference (unknown task or agent id).
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::TaskNotFound(_) | PoolError::AgentNotFound(_))
    }
}
