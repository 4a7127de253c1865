//! Assignment audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, TaskId};

/// One assignment of a task to an agent. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEntry {
    task_id: TaskId,
    agent_id: AgentId,
    assigned_at: DateTime<Utc>,
}

impl AssignmentEntry {
    pub fn new(task_id: TaskId, agent_id: AgentId, assigned_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            agent_id,
            assigned_at,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }
}
