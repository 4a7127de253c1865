//! Agent capability record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AgentId;

/// One worker able to execute tasks.
///
/// Records are created on registration, mutated on every assignment,
/// completion or failure, and never deleted (only deactivated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub skills: Vec<String>,

    /// Tasks currently assigned to (or in progress on) this agent.
    pub current_load: u32,
    pub max_load: u32,

    /// Rolling average cost per completed task.
    pub average_cost: f64,

    /// Exponential moving average of task outcomes (1.0 = always succeeds).
    pub success_rate: f64,

    pub active: bool,

    /// Bumped each time the id is registered again. Tasks remember the
    /// generation they were assigned under.
    #[serde(default)]
    pub generation: u32,

    pub registered_at: DateTime<Utc>,

    /// Last successful completion.
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    pub fn new(
        id: AgentId,
        skills: Vec<String>,
        max_load: u32,
        average_cost: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            skills,
            current_load: 0,
            max_load,
            average_cost,
            success_rate: 1.0,
            active: true,
            generation: 0,
            registered_at: now,
            last_completed_at: None,
        }
    }

    /// Active and below its load limit.
    pub fn has_capacity(&self) -> bool {
        self.active && self.current_load < self.max_load
    }

    /// Load as a fraction of capacity. A zero-capacity agent counts as full.
    pub fn load_ratio(&self) -> f64 {
        if self.max_load == 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.max_load)
    }

    pub fn utilization_percent(&self) -> f64 {
        self.load_ratio() * 100.0
    }

    pub fn acquire(&mut self) {
        self.current_load += 1;
    }

    pub fn release(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
    }

    /// Record a finished task.
    ///
    /// `alpha` is the EMA weight of the newest outcome:
    /// `rate = rate * (1 - alpha) + alpha * outcome`. Only successes move
    /// `last_completed_at`.
    pub fn record_outcome(&mut self, success: bool, alpha: f64, now: DateTime<Utc>) {
        let target = if success { 1.0 } else { 0.0 };
        self.success_rate = self.success_rate * (1.0 - alpha) + alpha * target;
        if success {
            self.last_completed_at = Some(now);
        }
    }

    /// Fold the cost of a completed task into the rolling average.
    pub fn record_cost(&mut self, cost: u64, alpha: f64) {
        self.average_cost = self.average_cost * (1.0 - alpha) + alpha * cost as f64;
    }
}
