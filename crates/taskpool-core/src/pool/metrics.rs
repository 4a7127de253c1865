//! Derived metrics: status counts, wait/execution times, utilization and the
//! context-sharing savings estimate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, AgentRecord, TaskId, TaskRecord, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Assigned => self.assigned += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Blocked => self.blocked += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.assigned + self.in_progress + self.completed + self.failed + self.blocked
    }

    /// Tasks that will not move again without outside help.
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

/// Workload of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    pub active: bool,
    pub current_load: u32,
    pub max_load: u32,
    pub utilization_percent: f64,
    pub success_rate: f64,
    pub average_cost: f64,
    /// Tasks currently assigned to or in progress on the agent.
    pub tasks: Vec<TaskId>,
}

impl AgentWorkload {
    pub fn from_agent<'a>(
        agent: &AgentRecord,
        tasks: impl IntoIterator<Item = &'a TaskRecord>,
    ) -> Self {
        let mut held: Vec<TaskId> = tasks
            .into_iter()
            .filter(|t| {
                t.status.holds_agent()
                    && t.assigned_agent.as_ref() == Some(&agent.id)
                    && t.agent_generation == agent.generation
            })
            .map(|t| t.id)
            .collect();
        held.sort();
        Self {
            agent_id: agent.id.clone(),
            active: agent.active,
            current_load: agent.current_load,
            max_load: agent.max_load,
            utilization_percent: agent.utilization_percent(),
            success_rate: agent.success_rate,
            average_cost: agent.average_cost,
            tasks: held,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_tasks: usize,
    pub counts: StatusCounts,
    /// Tasks waiting in the queue (pending only).
    pub queue_depth: usize,
    /// Mean time from creation to (latest) assignment.
    pub average_wait_ms: f64,
    /// Mean time from assignment to completion, over completed tasks.
    pub average_execution_ms: f64,
    pub agent_utilization: BTreeMap<AgentId, f64>,
    /// Heuristic: a fixed share of the estimated cost of every completed task
    /// that carried a shared-context reference. Not a measured value.
    pub token_savings: u64,
    pub computed_at: DateTime<Utc>,
}

pub(crate) fn compute<'a>(
    tasks: impl IntoIterator<Item = &'a TaskRecord>,
    agents: impl IntoIterator<Item = &'a AgentRecord>,
    savings_ratio: f64,
    now: DateTime<Utc>,
) -> PoolMetrics {
    let mut counts = StatusCounts::default();
    let mut wait_total = 0i64;
    let mut wait_n = 0u32;
    let mut exec_total = 0i64;
    let mut exec_n = 0u32;
    let mut savings = 0f64;

    for task in tasks {
        counts.record(task.status);

        if let Some(assigned_at) = task.assigned_at {
            wait_total += (assigned_at - task.created_at).num_milliseconds();
            wait_n += 1;
        }

        if task.status == TaskStatus::Completed {
            if let (Some(assigned_at), Some(completed_at)) = (task.assigned_at, task.completed_at) {
                exec_total += (completed_at - assigned_at).num_milliseconds();
                exec_n += 1;
            }
            if task.context_hash().is_some() {
                savings += task.estimated_cost as f64 * savings_ratio;
            }
        }
    }

    let agent_utilization = agents
        .into_iter()
        .map(|a| (a.id.clone(), a.utilization_percent()))
        .collect();

    PoolMetrics {
        total_tasks: counts.total(),
        counts,
        queue_depth: counts.pending,
        average_wait_ms: mean(wait_total, wait_n),
        average_execution_ms: mean(exec_total, exec_n),
        agent_utilization,
        token_savings: savings.round() as u64,
        computed_at: now,
    }
}

fn mean(total: i64, n: u32) -> f64 {
    if n == 0 {
        0.0
    } else {
        total as f64 / f64::from(n)
    }
}
