//! Task model: priority, lifecycle status, caller input and stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AgentId, TaskId};

/// Metadata key that may carry a shared-context reference.
pub const CONTEXT_HASH_KEY: &str = "context_hash";

/// Task priority. Ordering follows urgency: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric rank used by the queue (higher runs first).
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Task lifecycle status.
///
/// State transitions:
/// - Pending -> Assigned -> InProgress -> Completed
/// - Pending -> Assigned -> (InProgress ->) Failed -> Pending (retry, while retries remain)
/// - Pending -> Assigned -> (InProgress ->) Failed (permanent, retries exhausted)
/// - Blocked -> Pending (every dependency completed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for an eligible agent.
    Pending,

    /// Bound to an agent, not started yet.
    Assigned,

    /// The agent reported that work has started.
    InProgress,

    /// Finished successfully.
    Completed,

    /// Failed permanently (retries exhausted).
    Failed,

    /// Waiting for dependencies.
    Blocked,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    ///
    /// `Failed` only becomes terminal once retries are exhausted; a failure
    /// with retries left moves the task straight back to `Pending`, so a
    /// stored `Failed` status is always terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Does the task hold one unit of its agent's load?
    pub fn holds_agent(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Caller input for a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,

    #[serde(default)]
    pub priority: Priority,

    /// Estimated resource cost (tokens).
    #[serde(default)]
    pub estimated_cost: u64,

    #[serde(default)]
    pub required_skills: Vec<String>,

    /// Ids of tasks this one waits for. Unknown ids are tolerated and never
    /// count as satisfied.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default)]
    pub phase: u32,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Opaque shared-context reference.
    #[serde(default)]
    pub context_hash: Option<String>,

    /// Overrides the pool-wide retry limit for this task.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn estimated_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn requires<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn phase(mut self, phase: u32) -> Self {
        self.phase = phase;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn context_hash(mut self, hash: impl Into<String>) -> Self {
        self.context_hash = Some(hash.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A task as stored by the pool.
///
/// Design:
/// - The pool registry is the single owner of every record.
/// - Queue structures hold `TaskId` only.
/// - Status changes go through the methods below so timestamps stay coherent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub estimated_cost: u64,
    pub required_skills: Vec<String>,
    pub dependencies: Vec<TaskId>,
    pub phase: u32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub context_hash: Option<String>,

    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,

    /// Registration generation of `assigned_agent` at assignment time.
    #[serde(default)]
    pub agent_generation: u32,

    /// Number of failures that were retried.
    pub retry_count: u32,

    /// Per-task retry limit; `None` defers to the pool's retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Number of times the task was handed to an agent.
    pub attempts: u32,

    /// Monotonic creation order, used as the queue tie-breaker.
    pub sequence: u64,

    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, spec: TaskSpec, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            description: spec.description,
            priority: spec.priority,
            estimated_cost: spec.estimated_cost,
            required_skills: spec.required_skills,
            dependencies: spec.dependencies,
            phase: spec.phase,
            metadata: spec.metadata,
            context_hash: spec.context_hash,
            status: TaskStatus::Pending,
            assigned_agent: None,
            agent_generation: 0,
            retry_count: 0,
            max_retries: spec.max_retries,
            attempts: 0,
            sequence,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Shared-context reference: the explicit field, else the
    /// `context_hash` metadata entry.
    pub fn context_hash(&self) -> Option<&str> {
        self.context_hash.as_deref().or_else(|| {
            self.metadata
                .get(CONTEXT_HASH_KEY)
                .and_then(serde_json::Value::as_str)
        })
    }

    /// Bind to `agent` as registered under `generation`.
    pub fn mark_assigned(&mut self, agent: AgentId, generation: u32, now: DateTime<Utc>) {
        self.status = TaskStatus::Assigned;
        self.assigned_agent = Some(agent);
        self.agent_generation = generation;
        self.attempts += 1;
        self.assigned_at = Some(now);
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now;
    }

    pub fn mark_in_progress(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_finished(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Failed with retries left: back to the queue, unbound from its agent.
    pub fn requeue_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.assigned_agent = None;
        self.retry_count += 1;
        self.updated_at = now;
    }

    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// Shallow merge: keys in `patch` overwrite existing keys.
    pub fn merge_metadata(&mut self, patch: serde_json::Map<String, serde_json::Value>) {
        self.metadata.extend(patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[rstest]
    #[case(Priority::Low, Priority::Medium)]
    #[case(Priority::Medium, Priority::High)]
    #[case(Priority::High, Priority::Critical)]
    fn priority_ordering(#[case] lower: Priority, #[case] higher: Priority) {
        assert!(lower < higher);
        assert!(lower.rank() < higher.rank());
    }

    #[test]
    fn priority_parses_from_snake_case() {
        let p: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, Priority::Critical);
    }

    #[rstest]
    #[case(TaskStatus::Pending, false)]
    #[case(TaskStatus::Assigned, false)]
    #[case(TaskStatus::InProgress, false)]
    #[case(TaskStatus::Blocked, false)]
    #[case(TaskStatus::Completed, true)]
    #[case(TaskStatus::Failed, true)]
    fn terminal_states(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn record_keeps_spec_retry_override() {
        let spec = TaskSpec::new("x").max_retries(7);
        let record = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 0, at(0));
        assert_eq!(record.max_retries, Some(7));

        let record = TaskRecord::new(TaskId::from_ulid(Ulid::new()), TaskSpec::new("y"), 1, at(0));
        assert_eq!(record.max_retries, None);
    }

    #[test]
    fn context_hash_falls_back_to_metadata() {
        let spec = TaskSpec::new("x").meta(CONTEXT_HASH_KEY, serde_json::json!("abc"));
        let record = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 0, at(0));
        assert_eq!(record.context_hash(), Some("abc"));

        let spec = TaskSpec::new("x")
            .context_hash("explicit")
            .meta(CONTEXT_HASH_KEY, serde_json::json!("abc"));
        let record = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 0, at(0));
        assert_eq!(record.context_hash(), Some("explicit"));
    }

    #[test]
    fn retry_bookkeeping() {
        let mut record =
            TaskRecord::new(TaskId::from_ulid(Ulid::new()), TaskSpec::new("x"), 0, at(0));
        record.mark_assigned(AgentId::new("a"), 2, at(1));
        assert_eq!(record.attempts, 1);
        assert_eq!(record.agent_generation, 2);

        record.requeue_for_retry(at(2));
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.assigned_agent, None);
        assert_eq!(record.retry_count, 1);

        record.mark_assigned(AgentId::new("a"), 3, at(3));
        assert_eq!(record.attempts, 2);
        assert_eq!(record.started_at, None);
    }

    #[test]
    fn merge_metadata_overwrites_keys() {
        let spec = TaskSpec::new("x")
            .meta("a", serde_json::json!(1))
            .meta("b", serde_json::json!(2));
        let mut record = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 0, at(0));
        let mut patch = serde_json::Map::new();
        patch.insert("b".into(), serde_json::json!(20));
        patch.insert("c".into(), serde_json::json!(30));
        record.merge_metadata(patch);
        assert_eq!(record.metadata["a"], 1);
        assert_eq!(record.metadata["b"], 20);
        assert_eq!(record.metadata["c"], 30);
    }
}
