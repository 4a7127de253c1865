//! ContextStore port - the shared-context collaborator.
//!
//! A task may carry an opaque context hash. Before such a task's assignment
//! becomes effective, the pool hands the reference to the store so the chosen
//! agent can pick the context up. The storage format is the store's business.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AgentId, TaskId};

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("unknown context: {0}")]
    Unknown(String),

    #[error("context store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Make `context_hash` available to `agent_id` for `task_id`.
    async fn propagate(
        &self,
        context_hash: &str,
        task_id: TaskId,
        agent_id: &AgentId,
    ) -> Result<(), ContextError>;

    /// Tasks that have shared `context_hash` so far.
    async fn lookup(&self, context_hash: &str) -> Result<Vec<TaskId>, ContextError>;
}
