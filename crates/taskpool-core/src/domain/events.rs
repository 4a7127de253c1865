//! Domain events published by the pool.
//!
//! Subscribers receive these through `TaskPoolManager::subscribe`. Events are
//! snapshots; mutating them has no effect on the pool.

use serde::{Deserialize, Serialize};

use super::agent::AgentRecord;
use super::ids::AgentId;
use super::task::{TaskRecord, TaskStatus};
use crate::pool::{PoolMetrics, RebalanceReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    TaskAdded {
        task: TaskRecord,
    },
    TaskAssigned {
        task: TaskRecord,
        agent: AgentRecord,
    },
    TaskUpdated {
        task: TaskRecord,
        previous: TaskStatus,
    },
    /// A failure was retried; the task is pending again.
    TaskRetried {
        task: TaskRecord,
    },
    AgentRegistered {
        agent: AgentRecord,
    },
    AgentStatusChanged {
        agent_id: AgentId,
        active: bool,
    },
    MetricsUpdated {
        metrics: PoolMetrics,
    },
    RebalanceCompleted {
        report: RebalanceReport,
    },
}

impl PoolEvent {
    /// Short name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::TaskAdded { .. } => "task_added",
            PoolEvent::TaskAssigned { .. } => "task_assigned",
            PoolEvent::TaskUpdated { .. } => "task_updated",
            PoolEvent::TaskRetried { .. } => "task_retried",
            PoolEvent::AgentRegistered { .. } => "agent_registered",
            PoolEvent::AgentStatusChanged { .. } => "agent_status_changed",
            PoolEvent::MetricsUpdated { .. } => "metrics_updated",
            PoolEvent::RebalanceCompleted { .. } => "rebalance_completed",
        }
    }
}
