//! InMemoryContextStore - shared-context store for development and tests.
//!
//! Records which task/agent pairs received each context hash. It stores no
//! context payloads; the hash stays opaque.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{AgentId, TaskId};
use crate::ports::{ContextError, ContextStore};

#[derive(Debug, Clone, PartialEq)]
pub struct ContextShare {
    pub task_id: TaskId,
    pub agent_id: AgentId,
}

#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    shares: Mutex<HashMap<String, Vec<ContextShare>>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every share recorded for `context_hash`, in propagation order.
    pub fn shares(&self, context_hash: &str) -> Vec<ContextShare> {
        self.shares
            .lock()
            .map(|m| m.get(context_hash).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn propagate(
        &self,
        context_hash: &str,
        task_id: TaskId,
        agent_id: &AgentId,
    ) -> Result<(), ContextError> {
        let mut shares = self
            .shares
            .lock()
            .map_err(|e| ContextError::Unavailable(e.to_string()))?;
        shares
            .entry(context_hash.to_string())
            .or_default()
            .push(ContextShare {
                task_id,
                agent_id: agent_id.clone(),
            });
        Ok(())
    }

    async fn lookup(&self, context_hash: &str) -> Result<Vec<TaskId>, ContextError> {
        let shares = self
            .shares
            .lock()
            .map_err(|e| ContextError::Unavailable(e.to_string()))?;
        shares
            .get(context_hash)
            .map(|v| v.iter().map(|s| s.task_id).collect())
            .ok_or_else(|| ContextError::Unknown(context_hash.to_string()))
    }
}
