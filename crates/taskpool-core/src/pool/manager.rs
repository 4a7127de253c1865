//! TaskPoolManager - the async handle orchestration code talks to.
//!
//! Wraps `TaskPoolState` in one `tokio::sync::Mutex`: commands, timers and
//! queries all take the same lock, so registry mutations never interleave.
//! The lock is held across the context-store call of an assignment; the
//! assignment only becomes effective once the context has been propagated.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use super::config::{ConfigError, PoolConfig};
use super::metrics::{AgentWorkload, PoolMetrics};
use super::state::{PoolSnapshot, RebalanceReport, TaskPoolState};
use crate::domain::{
    AgentId, AgentRecord, AssignmentEntry, PoolError, PoolEvent, TaskId, TaskRecord, TaskSpec,
    TaskStatus,
};
use crate::impls::InMemoryContextStore;
use crate::ports::{Clock, ContextError, ContextStore, SystemClock};

/// Builds a `TaskPoolManager`.
///
/// # Example
/// ```ignore
/// let pool = TaskPoolManager::builder()
///     .config(PoolConfig::default())
///     .context_store(Arc::new(InMemoryContextStore::new()))
///     .build()?;
/// ```
///
/// The config is validated in `build()`, so a bad config file fails at
/// startup instead of on the first timer tick.
pub struct TaskPoolBuilder {
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    context: Arc<dyn ContextStore>,
}

impl TaskPoolBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            clock: Arc::new(SystemClock),
            context: Arc::new(InMemoryContextStore::new()),
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn context_store(mut self, context: Arc<dyn ContextStore>) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> Result<TaskPoolManager, ConfigError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(self.config.event_capacity);
        Ok(TaskPoolManager {
            config: Arc::new(self.config.clone()),
            state: Arc::new(Mutex::new(TaskPoolState::new(self.config, self.clock))),
            events,
            context: self.context,
        })
    }
}

impl Default for TaskPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle; clones share the same pool.
#[derive(Clone)]
pub struct TaskPoolManager {
    config: Arc<PoolConfig>,
    state: Arc<Mutex<TaskPoolState>>,
    events: broadcast::Sender<PoolEvent>,
    context: Arc<dyn ContextStore>,
}

impl TaskPoolManager {
    pub fn builder() -> TaskPoolBuilder {
        TaskPoolBuilder::new()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Receive every event published after this call. Slow receivers lose the
    /// oldest events (`RecvError::Lagged`); the pool never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Add a task and, when it is pending, try to assign it right away.
    ///
    /// Never rejects: a task nobody can run stays queued.
    pub async fn add_task(&self, spec: TaskSpec) -> TaskId {
        let mut state = self.state.lock().await;
        let id = state.add_task(spec);
        self.try_assign(&mut state, id).await;
        self.publish(&mut state);
        id
    }

    /// Add several tasks, then run a single assignment pass so queue order
    /// (priority, then creation) decides who gets scarce agents.
    pub async fn add_tasks(&self, specs: impl IntoIterator<Item = TaskSpec>) -> Vec<TaskId> {
        let mut state = self.state.lock().await;
        let ids = specs.into_iter().map(|spec| state.add_task(spec)).collect();
        self.assign_pass(&mut state).await;
        self.publish(&mut state);
        ids
    }

    /// Report a task status (`InProgress`, `Completed`, `Failed`, `Blocked`).
    ///
    /// Completion unblocks dependents; failure is retried until the task's
    /// retry limit. Whenever capacity or pending work appears, the pending
    /// queue is offered to agents again. Returns the task after the update.
    pub async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<TaskRecord, PoolError> {
        let mut state = self.state.lock().await;
        let change = state.update_status(task_id, status, metadata)?;
        if change.needs_assignment_pass() {
            self.assign_pass(&mut state).await;
        }
        self.publish(&mut state);
        state
            .task(task_id)
            .cloned()
            .ok_or(PoolError::TaskNotFound(task_id))
    }

    /// Register (or re-register) an agent. `max_load` defaults to the pool's
    /// `default_max_load`.
    pub async fn register_agent(
        &self,
        agent_id: impl Into<AgentId>,
        skills: Vec<String>,
        max_load: Option<u32>,
    ) -> AgentRecord {
        let mut state = self.state.lock().await;
        let record = state.register_agent(agent_id.into(), skills, max_load);
        self.assign_pass(&mut state).await;
        self.publish(&mut state);
        record
    }

    /// Activate or deactivate an agent. Setting the current value again only
    /// re-emits the event.
    pub async fn update_agent_status(
        &self,
        agent_id: &AgentId,
        active: bool,
    ) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        state.set_agent_active(agent_id, active)?;
        if active {
            self.assign_pass(&mut state).await;
        }
        self.publish(&mut state);
        Ok(())
    }

    /// Run one assignment pass over the pending queue. Returns how many tasks
    /// were assigned.
    pub async fn assign_pending(&self) -> usize {
        let mut state = self.state.lock().await;
        let assigned = self.assign_pass(&mut state).await;
        self.publish(&mut state);
        assigned
    }

    /// Best-effort rebalance.
    ///
    /// Only acts when some active agent is above the overload threshold while
    /// another is below the underload threshold. It then re-evaluates blocked
    /// tasks and retries assignment of pending ones. Work already assigned is
    /// never taken away from an agent.
    pub async fn rebalance(&self) -> RebalanceReport {
        let mut state = self.state.lock().await;
        let (overloaded, underloaded) = state.load_groups();
        let triggered = !overloaded.is_empty() && !underloaded.is_empty();

        let (unblocked, assigned) = if triggered {
            let unblocked = state.unblock_satisfied().len();
            let assigned = self.assign_pass(&mut state).await;
            (unblocked, assigned)
        } else {
            (0, 0)
        };

        let report = RebalanceReport {
            overloaded,
            underloaded,
            triggered,
            unblocked,
            assigned,
            completed_at: state.now(),
        };
        debug!(
            triggered,
            unblocked,
            assigned,
            overloaded = report.overloaded.len(),
            underloaded = report.underloaded.len(),
            "rebalance finished"
        );
        self.publish(&mut state);
        let _ = self.events.send(PoolEvent::RebalanceCompleted {
            report: report.clone(),
        });
        report
    }

    /// Recompute metrics and publish them as `MetricsUpdated`.
    pub async fn refresh_metrics(&self) -> PoolMetrics {
        let metrics = self.state.lock().await.metrics();
        let _ = self.events.send(PoolEvent::MetricsUpdated {
            metrics: metrics.clone(),
        });
        metrics
    }

    // ---------------------------------------------------------------------
    // Queries (snapshots)
    // ---------------------------------------------------------------------

    pub async fn pool_state(&self) -> PoolSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn metrics(&self) -> PoolMetrics {
        self.state.lock().await.metrics()
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.task(task_id).cloned()
    }

    pub async fn get_agent(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        self.state.lock().await.agent(agent_id).cloned()
    }

    pub async fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        self.state.lock().await.tasks_by_status(status)
    }

    pub async fn agent_workload(&self, agent_id: &AgentId) -> Result<AgentWorkload, PoolError> {
        self.state.lock().await.agent_workload(agent_id)
    }

    pub async fn workloads(&self) -> Vec<AgentWorkload> {
        self.state.lock().await.workloads()
    }

    pub async fn assignment_history(&self) -> Vec<AssignmentEntry> {
        self.state.lock().await.history().to_vec()
    }

    /// No task is assigned or in progress.
    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.is_idle()
    }

    /// Tasks that have been handed `context_hash` so far, in propagation
    /// order. A hash the store has never seen yields an empty list.
    pub async fn shared_context(&self, context_hash: &str) -> Result<Vec<TaskId>, PoolError> {
        match self.context.lookup(context_hash).await {
            Ok(tasks) => Ok(tasks),
            Err(ContextError::Unknown(_)) => Ok(Vec::new()),
            Err(e) => Err(PoolError::Context {
                context_hash: context_hash.to_string(),
                message: e.to_string(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Internals (caller holds the lock)
    // ---------------------------------------------------------------------

    async fn assign_pass(&self, state: &mut TaskPoolState) -> usize {
        let mut assigned = 0;
        for task_id in state.pending_in_order() {
            if self.try_assign(state, task_id).await {
                assigned += 1;
            }
        }
        assigned
    }

    /// Plan, propagate shared context, commit. Returns true when the task
    /// ended up assigned.
    async fn try_assign(&self, state: &mut TaskPoolState, task_id: TaskId) -> bool {
        let Some(candidate) = state.plan_assignment(task_id) else {
            return false;
        };

        if let Some(hash) = candidate.context_hash.as_deref()
            && let Err(e) = self
                .context
                .propagate(hash, task_id, &candidate.agent_id)
                .await
        {
            let err = PoolError::Context {
                context_hash: hash.to_string(),
                message: e.to_string(),
            };
            warn!(task_id = %task_id, agent_id = %candidate.agent_id, error = %err, "assignment abandoned");
            return false;
        }

        match state.commit_assignment(task_id, &candidate.agent_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "assignment rejected");
                false
            }
        }
    }

    fn publish(&self, state: &mut TaskPoolState) {
        for event in state.drain_events() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
