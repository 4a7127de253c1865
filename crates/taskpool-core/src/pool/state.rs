//! TaskPoolState - the synchronous core of the pool.
//!
//! Owns both registries (tasks, agents), the waiting queue, the dependency
//! graph and the assignment history. Every method runs to completion without
//! awaiting, so the state is always consistent between two calls.
//!
//! Assignment is split in two steps, `plan_assignment` and
//! `commit_assignment`, so the async manager can propagate shared context in
//! between. Events are collected in an outbox and drained by the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::dependency::Dependents;
use super::metrics::{self, AgentWorkload, PoolMetrics};
use super::queue::TaskQueue;
use super::retry::{FailureDecision, RetryPolicy};
use super::scoring;
use crate::domain::{
    AgentId, AgentRecord, AssignmentEntry, PoolError, PoolEvent, TaskId, TaskRecord, TaskSpec,
    TaskStatus,
};
use crate::ports::{Clock, IdGenerator, UlidGenerator};

/// Result of `plan_assignment`: the agent a pending task should go to.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentCandidate {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub score: f64,
    pub context_hash: Option<String>,
}

/// What a status update did.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub task: TaskRecord,
    pub previous: TaskStatus,
    /// The failure was retried; the task is pending again.
    pub retried: bool,
    /// Blocked tasks that became pending.
    pub unblocked: Vec<TaskId>,
    /// An agent got one unit of load back.
    pub released: bool,
}

impl StatusChange {
    /// Something became assignable (pending work or free capacity).
    pub fn needs_assignment_pass(&self) -> bool {
        self.retried || self.released || !self.unblocked.is_empty()
    }
}

/// Outcome of one rebalance round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub overloaded: Vec<AgentId>,
    pub underloaded: Vec<AgentId>,
    /// Both groups were non-empty, so pending/blocked tasks were re-evaluated.
    pub triggered: bool,
    pub unblocked: usize,
    pub assigned: usize,
    pub completed_at: DateTime<Utc>,
}

/// Read-only copy of the whole pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Tasks in creation order.
    pub tasks: Vec<TaskRecord>,
    pub agents: Vec<AgentRecord>,
    pub metrics: PoolMetrics,
}

pub struct TaskPoolState {
    config: PoolConfig,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,

    /// All task records (single source of truth for tasks).
    tasks: HashMap<TaskId, TaskRecord>,

    /// All agents, keyed by id. Ordered so agent selection is deterministic.
    agents: BTreeMap<AgentId, AgentRecord>,

    /// Pending and blocked tasks (TaskIds only).
    queue: TaskQueue,

    dependents: Dependents,
    history: Vec<AssignmentEntry>,

    /// Events produced since the last drain.
    outbox: Vec<PoolEvent>,

    next_sequence: u64,
}

impl TaskPoolState {
    pub fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        let ids = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_id_generator(config, clock, ids)
    }

    pub fn with_id_generator(
        config: PoolConfig,
        clock: Arc<dyn Clock>,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        Self {
            retry_policy: RetryPolicy::new(config.max_retries),
            config,
            clock,
            ids,
            tasks: HashMap::new(),
            agents: BTreeMap::new(),
            queue: TaskQueue::new(),
            dependents: Dependents::new(),
            history: Vec::new(),
            outbox: Vec::new(),
            next_sequence: 0,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Take every event produced since the last call.
    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    /// Register a new task. It starts `Blocked` when any dependency is not
    /// completed yet (unknown ids count as not completed), `Pending` otherwise.
    ///
    /// No assignment happens here; see `plan_assignment`.
    pub fn add_task(&mut self, spec: TaskSpec) -> TaskId {
        let now = self.now();
        let id = self.ids.generate_task_id();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut record = TaskRecord::new(id, spec, sequence, now);
        self.dependents.record(id, &record.dependencies);
        if !self.dependencies_satisfied(&record) {
            record.set_status(TaskStatus::Blocked, now);
        }

        info!(
            task_id = %id,
            priority = %record.priority,
            status = %record.status,
            phase = record.phase,
            "task added"
        );

        self.queue.push(id, record.priority, sequence);
        if self.queue.len() > self.config.soft_queue_limit {
            warn!(
                queue_len = self.queue.len(),
                limit = self.config.soft_queue_limit,
                "task queue above soft limit; accepting anyway"
            );
        }

        self.outbox.push(PoolEvent::TaskAdded {
            task: record.clone(),
        });
        self.tasks.insert(id, record);
        id
    }

    fn dependencies_satisfied(&self, task: &TaskRecord) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status == TaskStatus::Completed)
        })
    }

    /// Pending task ids in queue order (priority, then creation).
    pub fn pending_in_order(&self) -> Vec<TaskId> {
        self.queue
            .ordered_ids()
            .into_iter()
            .filter(|id| {
                self.tasks
                    .get(id)
                    .is_some_and(|t| t.status == TaskStatus::Pending)
            })
            .collect()
    }

    /// Pick the best eligible agent for a pending task, without changing
    /// anything. `None` when the task is not pending or nobody qualifies.
    pub fn plan_assignment(&self, task_id: TaskId) -> Option<AssignmentCandidate> {
        let task = self.tasks.get(&task_id)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        let Some((agent, score)) =
            scoring::select_agent(self.agents.values(), task, &self.config.weights)
        else {
            debug!(task_id = %task_id, "no eligible agent; task stays queued");
            return None;
        };
        Some(AssignmentCandidate {
            task_id,
            agent_id: agent.id.clone(),
            score,
            context_hash: task.context_hash().map(str::to_string),
        })
    }

    /// Bind a pending task to an agent.
    ///
    /// Re-checks eligibility, so a stale candidate can never push an agent
    /// past its max load.
    pub fn commit_assignment(
        &mut self,
        task_id: TaskId,
        agent_id: &AgentId,
    ) -> Result<(), PoolError> {
        let now = self.now();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Pending {
            return Err(PoolError::InvalidStatusUpdate {
                task_id,
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.clone()))?;
        if !scoring::is_eligible(agent, task) {
            return Err(PoolError::AgentUnavailable(agent_id.clone()));
        }

        agent.acquire();
        debug_assert!(agent.current_load <= agent.max_load);
        task.mark_assigned(agent_id.clone(), agent.generation, now);
        self.queue.remove(task_id);
        self.history
            .push(AssignmentEntry::new(task_id, agent_id.clone(), now));

        info!(
            task_id = %task_id,
            agent_id = %agent_id,
            attempt = task.attempts,
            load = agent.current_load,
            max_load = agent.max_load,
            "task assigned"
        );

        self.outbox.push(PoolEvent::TaskAssigned {
            task: task.clone(),
            agent: agent.clone(),
        });
        Ok(())
    }

    /// Apply a status reported by the caller.
    ///
    /// Accepted statuses: `InProgress`, `Completed`, `Failed`, `Blocked`.
    /// `metadata` is merged into the task's metadata (keys overwrite).
    pub fn update_status(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<StatusChange, PoolError> {
        let now = self.now();
        let Some(task) = self.tasks.get_mut(&task_id) else {
            warn!(task_id = %task_id, status = %status, "status update for unknown task");
            return Err(PoolError::TaskNotFound(task_id));
        };
        let previous = task.status;

        let allowed = match status {
            TaskStatus::InProgress => matches!(previous, TaskStatus::Assigned | TaskStatus::InProgress),
            TaskStatus::Completed | TaskStatus::Failed => previous.holds_agent(),
            TaskStatus::Blocked => !previous.is_terminal(),
            TaskStatus::Pending | TaskStatus::Assigned => false,
        };
        if !allowed {
            warn!(task_id = %task_id, from = %previous, to = %status, "rejected status update");
            return Err(PoolError::InvalidStatusUpdate {
                task_id,
                from: previous,
                to: status,
            });
        }

        if let Some(patch) = metadata {
            task.merge_metadata(patch);
        }

        let mut change = StatusChange {
            task: task.clone(),
            previous,
            retried: false,
            unblocked: Vec::new(),
            released: false,
        };

        match status {
            TaskStatus::InProgress => {
                if previous != TaskStatus::InProgress {
                    task.mark_in_progress(now);
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                task.mark_finished(status, now);
                let holder = task.assigned_agent.clone().map(|a| (a, task.agent_generation));
                let cost = task.estimated_cost;
                let success = status == TaskStatus::Completed;
                if let Some((agent_id, generation)) = holder {
                    change.released =
                        self.release_agent(&agent_id, generation, Some(success), cost, now);
                }
            }
            TaskStatus::Blocked => {
                let agent_id = task.assigned_agent.take();
                let (priority, sequence, generation) =
                    (task.priority, task.sequence, task.agent_generation);
                task.set_status(TaskStatus::Blocked, now);
                self.queue.push(task_id, priority, sequence);
                if previous.holds_agent()
                    && let Some(agent_id) = agent_id
                {
                    change.released = self.release_agent(&agent_id, generation, None, 0, now);
                }
            }
            TaskStatus::Pending | TaskStatus::Assigned => unreachable!("rejected above"),
        }

        info!(task_id = %task_id, from = %previous, to = %status, "task status updated");
        self.push_task_event(task_id, |task| PoolEvent::TaskUpdated { task, previous });

        match status {
            TaskStatus::Completed => {
                change.unblocked = self.unblock_waiters(task_id);
            }
            TaskStatus::Failed => {
                change.retried = self.handle_failure(task_id, now);
            }
            _ => {}
        }

        if let Some(task) = self.tasks.get(&task_id) {
            change.task = task.clone();
        }
        Ok(change)
    }

    /// Retry or give up. Returns true when the task went back to pending.
    fn handle_failure(&mut self, task_id: TaskId, now: DateTime<Utc>) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        match self.retry_policy.decide(task) {
            FailureDecision::Retry { retry } => {
                task.requeue_for_retry(now);
                self.queue.push(task_id, task.priority, task.sequence);
                info!(
                    task_id = %task_id,
                    retry,
                    max_retries = self.retry_policy.limit_for(task),
                    "task failed; retrying"
                );
                self.push_task_event(task_id, |task| PoolEvent::TaskRetried { task });
                true
            }
            FailureDecision::GiveUp { attempts } => {
                warn!(
                    task_id = %task_id,
                    attempts,
                    "task failed permanently; retries exhausted"
                );
                false
            }
        }
    }

    /// Give one unit of load back. `outcome` is folded into the success rate
    /// when the task finished (completed = true, failed = false).
    ///
    /// Nothing happens when the agent was re-registered after the task was
    /// assigned: the current record never counted that task.
    fn release_agent(
        &mut self,
        agent_id: &AgentId,
        generation: u32,
        outcome: Option<bool>,
        cost: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "releasing load of unknown agent");
            return false;
        };
        if agent.generation != generation {
            debug!(
                agent_id = %agent_id,
                task_generation = generation,
                agent_generation = agent.generation,
                "task held by a replaced registration; load untouched"
            );
            return false;
        }
        agent.release();
        if let Some(success) = outcome {
            agent.record_outcome(success, self.config.success_rate_alpha, now);
            if success {
                agent.record_cost(cost, self.config.average_cost_alpha);
            }
        }
        true
    }

    /// Re-check the tasks waiting on `completed`.
    fn unblock_waiters(&mut self, completed: TaskId) -> Vec<TaskId> {
        self.dependents
            .of(completed)
            .into_iter()
            .filter(|id| self.try_unblock(*id))
            .collect()
    }

    /// Move every blocked task whose dependencies are all completed back to
    /// pending. Returns the ids that moved, in queue order.
    pub fn unblock_satisfied(&mut self) -> Vec<TaskId> {
        self.queue
            .ordered_ids()
            .into_iter()
            .filter(|id| self.try_unblock(*id))
            .collect()
    }

    fn try_unblock(&mut self, task_id: TaskId) -> bool {
        let ready = match self.tasks.get(&task_id) {
            Some(t) => t.status == TaskStatus::Blocked && self.dependencies_satisfied(t),
            None => false,
        };
        if !ready {
            return false;
        }
        let now = self.now();
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.set_status(TaskStatus::Pending, now);
            self.queue.push(task_id, task.priority, task.sequence);
        }
        info!(task_id = %task_id, "dependencies satisfied; task pending");
        self.push_task_event(task_id, |task| PoolEvent::TaskUpdated {
            task,
            previous: TaskStatus::Blocked,
        });
        true
    }

    fn push_task_event(&mut self, task_id: TaskId, make: impl FnOnce(TaskRecord) -> PoolEvent) {
        if let Some(task) = self.tasks.get(&task_id) {
            self.outbox.push(make(task.clone()));
        }
    }

    // ---------------------------------------------------------------------
    // Agents
    // ---------------------------------------------------------------------

    /// Insert an agent record. Re-registering an id replaces the previous
    /// record (load, success rate and cost history start over) under a new
    /// generation; tasks still held from the old registration no longer count
    /// toward its load.
    pub fn register_agent(
        &mut self,
        agent_id: AgentId,
        skills: Vec<String>,
        max_load: Option<u32>,
    ) -> AgentRecord {
        let now = self.now();
        let mut record = AgentRecord::new(
            agent_id.clone(),
            skills,
            max_load.unwrap_or(self.config.default_max_load),
            self.config.default_average_cost,
            now,
        );
        if let Some(old) = self.agents.get(&agent_id) {
            record.generation = old.generation.wrapping_add(1);
        }
        if let Some(old) = self.agents.insert(agent_id.clone(), record.clone()) {
            warn!(
                agent_id = %agent_id,
                previous_load = old.current_load,
                generation = record.generation,
                "agent re-registered; previous record replaced"
            );
        } else {
            info!(agent_id = %agent_id, max_load = record.max_load, "agent registered");
        }
        self.outbox.push(PoolEvent::AgentRegistered {
            agent: record.clone(),
        });
        record
    }

    /// Mark an agent active or inactive. Inactive agents keep the tasks they
    /// already hold but receive no new ones.
    pub fn set_agent_active(&mut self, agent_id: &AgentId, active: bool) -> Result<(), PoolError> {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "status change for unknown agent");
            return Err(PoolError::AgentNotFound(agent_id.clone()));
        };
        if agent.active != active {
            info!(agent_id = %agent_id, active, "agent status changed");
        }
        agent.active = active;
        self.outbox.push(PoolEvent::AgentStatusChanged {
            agent_id: agent_id.clone(),
            active,
        });
        Ok(())
    }

    /// Active agents above the overload threshold and below the underload
    /// threshold.
    pub fn load_groups(&self) -> (Vec<AgentId>, Vec<AgentId>) {
        let mut overloaded = Vec::new();
        let mut underloaded = Vec::new();
        for agent in self.agents.values().filter(|a| a.active) {
            let ratio = agent.load_ratio();
            if ratio > self.config.overload_threshold {
                overloaded.push(agent.id.clone());
            } else if ratio < self.config.underload_threshold {
                underloaded.push(agent.id.clone());
            }
        }
        (overloaded, underloaded)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn task(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(&task_id)
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    /// Tasks with `status`, in creation order.
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    pub fn agent_workload(&self, agent_id: &AgentId) -> Result<AgentWorkload, PoolError> {
        self.agents
            .get(agent_id)
            .map(|a| AgentWorkload::from_agent(a, self.tasks.values()))
            .ok_or_else(|| PoolError::AgentNotFound(agent_id.clone()))
    }

    pub fn workloads(&self) -> Vec<AgentWorkload> {
        self.agents
            .values()
            .map(|a| AgentWorkload::from_agent(a, self.tasks.values()))
            .collect()
    }

    pub fn history(&self) -> &[AssignmentEntry] {
        &self.history
    }

    pub fn metrics(&self) -> PoolMetrics {
        metrics::compute(
            self.tasks.values(),
            self.agents.values(),
            self.config.context_savings_ratio,
            self.now(),
        )
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let mut tasks: Vec<TaskRecord> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        PoolSnapshot {
            tasks,
            agents: self.agents.values().cloned().collect(),
            metrics: self.metrics(),
        }
    }

    /// Nothing is assigned or in progress, so no status report can arrive to
    /// move the pool forward.
    pub fn is_idle(&self) -> bool {
        !self.tasks.values().any(|t| t.status.holds_agent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};

    fn state() -> (TaskPoolState, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (TaskPoolState::new(PoolConfig::default(), clock.clone()), clock)
    }

    fn assign_next(state: &mut TaskPoolState, task_id: TaskId) -> Option<AgentId> {
        let candidate = state.plan_assignment(task_id)?;
        state.commit_assignment(task_id, &candidate.agent_id).ok()?;
        Some(candidate.agent_id)
    }

    #[test]
    fn task_without_dependencies_is_pending() {
        let (mut s, _) = state();
        let id = s.add_task(TaskSpec::new("a"));
        assert_eq!(s.task(id).unwrap().status, TaskStatus::Pending);
        assert_eq!(s.pending_in_order(), vec![id]);
    }

    #[test]
    fn unknown_dependency_blocks_forever() {
        let (mut s, _) = state();
        let ghost = TaskId::from_ulid(ulid::Ulid::new());
        let id = s.add_task(TaskSpec::new("a").depends_on([ghost]));
        assert_eq!(s.task(id).unwrap().status, TaskStatus::Blocked);
        assert!(s.unblock_satisfied().is_empty());
        assert!(s.pending_in_order().is_empty());
    }

    #[test]
    fn commit_updates_load_history_and_events() {
        let (mut s, _) = state();
        s.register_agent(AgentId::new("a1"), vec!["frontend".into()], Some(1));
        let id = s.add_task(TaskSpec::new("ui").requires(["frontend"]));
        s.drain_events();

        assert_eq!(assign_next(&mut s, id), Some(AgentId::new("a1")));
        assert_eq!(s.task(id).unwrap().status, TaskStatus::Assigned);
        assert_eq!(s.agent(&AgentId::new("a1")).unwrap().current_load, 1);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].task_id(), id);

        let events = s.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "task_assigned");
    }

    #[test]
    fn commit_refuses_full_agent() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(1));
        let t1 = s.add_task(TaskSpec::new("1"));
        let t2 = s.add_task(TaskSpec::new("2"));
        s.commit_assignment(t1, &a).unwrap();

        let err = s.commit_assignment(t2, &a).unwrap_err();
        assert!(matches!(err, PoolError::AgentUnavailable(_)));
        assert_eq!(s.agent(&a).unwrap().current_load, 1);
        assert_eq!(s.task(t2).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn completion_releases_load_and_updates_agent() {
        let (mut s, clock) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(2));
        let id = s.add_task(TaskSpec::new("x").estimated_cost(2000));
        assign_next(&mut s, id).unwrap();

        clock.advance(Duration::seconds(2));
        s.update_status(id, TaskStatus::InProgress, None).unwrap();
        let change = s.update_status(id, TaskStatus::Completed, None).unwrap();

        assert!(change.released);
        assert!(!change.retried);
        let agent = s.agent(&a).unwrap();
        assert_eq!(agent.current_load, 0);
        assert_eq!(agent.success_rate, 1.0);
        assert!((agent.average_cost - 1100.0).abs() < 1e-9);
        assert_eq!(agent.last_completed_at, Some(clock.now()));
        let task = s.task(id).unwrap();
        assert_eq!(task.completed_at, Some(clock.now()));
        assert_eq!(task.assigned_agent, Some(a));
    }

    #[test]
    fn failure_is_retried_then_permanent() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(1));
        let id = s.add_task(TaskSpec::new("flaky").max_retries(1));

        assign_next(&mut s, id).unwrap();
        let change = s.update_status(id, TaskStatus::Failed, None).unwrap();
        assert!(change.retried);
        assert_eq!(change.task.status, TaskStatus::Pending);
        assert_eq!(change.task.assigned_agent, None);
        assert_eq!(change.task.retry_count, 1);
        assert!((s.agent(&a).unwrap().success_rate - 0.9).abs() < 1e-9);
        assert_eq!(s.agent(&a).unwrap().last_completed_at, None);

        assign_next(&mut s, id).unwrap();
        let change = s.update_status(id, TaskStatus::Failed, None).unwrap();
        assert!(!change.retried);
        assert_eq!(change.task.status, TaskStatus::Failed);
        assert_eq!(change.task.attempts, 2);
        assert!(s.pending_in_order().is_empty());
    }

    #[test]
    fn completion_unblocks_dependents_with_all_dependencies_done() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(3));
        let t1 = s.add_task(TaskSpec::new("1"));
        let t2 = s.add_task(TaskSpec::new("2"));
        let both = s.add_task(TaskSpec::new("both").depends_on([t1, t2]));
        let only1 = s.add_task(TaskSpec::new("only1").depends_on([t1]));
        assert_eq!(s.task(both).unwrap().status, TaskStatus::Blocked);

        assign_next(&mut s, t1).unwrap();
        assign_next(&mut s, t2).unwrap();

        let change = s.update_status(t1, TaskStatus::Completed, None).unwrap();
        assert_eq!(change.unblocked, vec![only1]);
        assert_eq!(s.task(both).unwrap().status, TaskStatus::Blocked);

        let change = s.update_status(t2, TaskStatus::Completed, None).unwrap();
        assert_eq!(change.unblocked, vec![both]);
        assert_eq!(s.task(both).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn dependency_on_completed_task_starts_pending() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a, vec![], Some(1));
        let t1 = s.add_task(TaskSpec::new("1"));
        assign_next(&mut s, t1).unwrap();
        s.update_status(t1, TaskStatus::Completed, None).unwrap();

        let t2 = s.add_task(TaskSpec::new("2").depends_on([t1]));
        assert_eq!(s.task(t2).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn unknown_task_update_is_not_found() {
        let (mut s, _) = state();
        let ghost = TaskId::from_ulid(ulid::Ulid::new());
        let err = s.update_status(ghost, TaskStatus::Completed, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rejects_reporting_pending_or_finishing_twice() {
        let (mut s, _) = state();
        s.register_agent(AgentId::new("a1"), vec![], Some(1));
        let id = s.add_task(TaskSpec::new("x"));

        // not assigned yet
        assert!(matches!(
            s.update_status(id, TaskStatus::Completed, None),
            Err(PoolError::InvalidStatusUpdate { .. })
        ));

        assign_next(&mut s, id).unwrap();
        assert!(matches!(
            s.update_status(id, TaskStatus::Pending, None),
            Err(PoolError::InvalidStatusUpdate { .. })
        ));

        s.update_status(id, TaskStatus::Completed, None).unwrap();
        assert!(matches!(
            s.update_status(id, TaskStatus::Completed, None),
            Err(PoolError::InvalidStatusUpdate { .. })
        ));
        assert_eq!(s.agent(&AgentId::new("a1")).unwrap().current_load, 0);
    }

    #[test]
    fn blocking_an_assigned_task_frees_its_agent() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(1));
        let id = s.add_task(TaskSpec::new("x"));
        assign_next(&mut s, id).unwrap();

        let change = s.update_status(id, TaskStatus::Blocked, None).unwrap();
        assert!(change.released);
        assert_eq!(s.agent(&a).unwrap().current_load, 0);
        assert_eq!(s.task(id).unwrap().assigned_agent, None);

        // no dependencies, so the next re-evaluation releases it
        assert_eq!(s.unblock_satisfied(), vec![id]);
    }

    #[test]
    fn status_update_merges_metadata() {
        let (mut s, _) = state();
        s.register_agent(AgentId::new("a1"), vec![], Some(1));
        let id = s.add_task(TaskSpec::new("x").meta("k", serde_json::json!("old")));
        assign_next(&mut s, id).unwrap();

        let mut patch = serde_json::Map::new();
        patch.insert("k".into(), serde_json::json!("new"));
        patch.insert("pr".into(), serde_json::json!(42));
        s.update_status(id, TaskStatus::InProgress, Some(patch)).unwrap();

        let task = s.task(id).unwrap();
        assert_eq!(task.metadata["k"], "new");
        assert_eq!(task.metadata["pr"], 42);
        assert!(task.started_at.is_some());
    }

    #[test]
    fn reregistering_replaces_record() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec!["rust".into()], Some(1));
        s.register_agent(a.clone(), vec!["go".into()], None);
        let agent = s.agent(&a).unwrap();
        assert_eq!(agent.skills, vec!["go".to_string()]);
        assert_eq!(agent.max_load, 3);
    }

    fn assert_load_matches_held_tasks(s: &TaskPoolState, agent_id: &AgentId) {
        let agent = s.agent(agent_id).unwrap();
        let workload = s.agent_workload(agent_id).unwrap();
        assert_eq!(agent.current_load as usize, workload.tasks.len());
        assert!(agent.current_load <= agent.max_load);
    }

    #[test]
    fn tasks_from_a_replaced_registration_do_not_free_new_capacity() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(1));
        let old = s.add_task(TaskSpec::new("old"));
        assign_next(&mut s, old).unwrap();

        let fresh = s.register_agent(a.clone(), vec![], Some(1));
        assert_eq!(fresh.generation, 1);
        assert_eq!(fresh.current_load, 0);

        let new = s.add_task(TaskSpec::new("new"));
        assign_next(&mut s, new).unwrap();
        assert_eq!(s.task(new).unwrap().agent_generation, 1);
        assert_load_matches_held_tasks(&s, &a);

        // Finishing the task the old registration held leaves the new load alone.
        let change = s.update_status(old, TaskStatus::Completed, None).unwrap();
        assert!(!change.released);
        assert_eq!(s.agent(&a).unwrap().current_load, 1);
        assert_eq!(s.agent(&a).unwrap().last_completed_at, None);
        assert_load_matches_held_tasks(&s, &a);

        let extra = s.add_task(TaskSpec::new("extra"));
        assert_eq!(assign_next(&mut s, extra), None);
        assert_eq!(s.task(extra).unwrap().status, TaskStatus::Pending);
        assert_load_matches_held_tasks(&s, &a);

        // The current registration's own task still releases normally.
        let change = s.update_status(new, TaskStatus::Completed, None).unwrap();
        assert!(change.released);
        assert_eq!(assign_next(&mut s, extra), Some(a.clone()));
        assert_load_matches_held_tasks(&s, &a);
    }

    #[test]
    fn blocking_a_task_from_a_replaced_registration_keeps_new_load() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(2));
        let old = s.add_task(TaskSpec::new("old"));
        assign_next(&mut s, old).unwrap();

        s.register_agent(a.clone(), vec![], Some(2));
        let new = s.add_task(TaskSpec::new("new"));
        assign_next(&mut s, new).unwrap();

        let change = s.update_status(old, TaskStatus::Blocked, None).unwrap();
        assert!(!change.released);
        assert_eq!(s.agent(&a).unwrap().current_load, 1);
        assert_load_matches_held_tasks(&s, &a);
    }

    #[test]
    fn inactive_agents_get_no_work() {
        let (mut s, _) = state();
        let a = AgentId::new("a1");
        s.register_agent(a.clone(), vec![], Some(1));
        s.set_agent_active(&a, false).unwrap();
        let id = s.add_task(TaskSpec::new("x"));
        assert!(s.plan_assignment(id).is_none());

        s.set_agent_active(&a, true).unwrap();
        assert!(s.plan_assignment(id).is_some());

        let ghost = AgentId::new("ghost");
        assert!(s.set_agent_active(&ghost, true).unwrap_err().is_not_found());
    }

    #[test]
    fn load_groups_split_by_thresholds() {
        let (mut s, _) = state();
        let busy = AgentId::new("busy");
        let idle = AgentId::new("idle");
        let mid = AgentId::new("mid");
        s.register_agent(busy.clone(), vec!["x".into()], Some(1));
        s.register_agent(idle.clone(), vec!["y".into()], Some(4));
        s.register_agent(mid.clone(), vec!["z".into()], Some(3));

        let t = s.add_task(TaskSpec::new("x").requires(["x"]));
        s.commit_assignment(t, &busy).unwrap();
        let t = s.add_task(TaskSpec::new("z1").requires(["z"]));
        s.commit_assignment(t, &mid).unwrap();
        let t = s.add_task(TaskSpec::new("z2").requires(["z"]));
        s.commit_assignment(t, &mid).unwrap();

        let (over, under) = s.load_groups();
        assert_eq!(over, vec![busy]);
        assert_eq!(under, vec![idle]);
    }

    #[test]
    fn tasks_by_status_in_creation_order() {
        let (mut s, _) = state();
        let a = s.add_task(TaskSpec::new("a"));
        let b = s.add_task(TaskSpec::new("b"));
        let ids: Vec<TaskId> = s
            .tasks_by_status(TaskStatus::Pending)
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }
}
