//! Simulated workers: one tokio task per assignment, reporting back to the
//! pool like a real agent would.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use taskpool_core::{
    PoolError, PoolEvent, PoolMetrics, TaskId, TaskPoolManager, TaskRecord, TaskStatus,
    spawn_maintenance,
};

use crate::plan::Plan;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub failure_rate: f64,
    pub work: Duration,
    pub seed: Option<u64>,
    pub timeout: Duration,
}

/// Feed `plan` into `pool` and run simulated workers until nothing can move.
///
/// Stops when no task is assigned or in progress and no worker is running:
/// either every task is terminal, or the rest can never be assigned.
pub async fn run_plan(
    pool: &TaskPoolManager,
    plan: &Plan,
    opts: &SimulationOptions,
) -> anyhow::Result<PoolMetrics> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&opts.failure_rate),
        "failure rate must be between 0 and 1, got {}",
        opts.failure_rate
    );
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Subscribe before anything is added so no assignment is missed.
    let mut events = pool.subscribe();
    let maintenance = spawn_maintenance(pool.clone());

    for agent in &plan.agents {
        pool.register_agent(agent.id.as_str(), agent.skills.clone(), agent.max_load)
            .await;
    }
    let mut ids: HashMap<String, TaskId> = HashMap::new();
    for task in &plan.tasks {
        let id = pool.add_task(task.to_spec(&ids)?).await;
        ids.insert(task.key.clone(), id);
    }
    info!(
        agents = plan.agents.len(),
        tasks = plan.tasks.len(),
        "plan loaded"
    );

    let mut workers = JoinSet::new();
    // (task, attempt) pairs that already have a worker.
    let mut dispatched: HashSet<(TaskId, u32)> = HashSet::new();
    let mut check = tokio::time::interval(opts.work.max(Duration::from_millis(10)));
    let deadline = Instant::now() + opts.timeout;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PoolEvent::TaskAssigned { task, agent }) => {
                    debug!(task_id = %task.id, agent_id = %agent.id, "dispatching");
                    dispatch(pool, &task, &mut dispatched, &mut workers, &mut rng, opts);
                }
                Ok(other) => debug!(event = other.kind(), "pool event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged; resyncing assigned tasks");
                    for task in pool.tasks_by_status(TaskStatus::Assigned).await {
                        dispatch(pool, &task, &mut dispatched, &mut workers, &mut rng, opts);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            Some(joined) = workers.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "worker report rejected"),
                Err(e) => warn!(error = %e, "worker panicked"),
            },
            _ = check.tick() => {
                if workers.is_empty() && pool.is_idle().await {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(timeout_secs = opts.timeout.as_secs(), "simulation timed out");
                    break;
                }
            }
        }
    }

    workers.shutdown().await;
    maintenance.shutdown_and_join().await;

    let metrics = pool.metrics().await;
    if metrics.counts.settled() < metrics.total_tasks {
        warn!(
            pending = metrics.counts.pending,
            blocked = metrics.counts.blocked,
            "some tasks could not be run by any agent"
        );
    }
    Ok(metrics)
}

fn dispatch(
    pool: &TaskPoolManager,
    task: &TaskRecord,
    dispatched: &mut HashSet<(TaskId, u32)>,
    workers: &mut JoinSet<Result<(), PoolError>>,
    rng: &mut StdRng,
    opts: &SimulationOptions,
) {
    if !dispatched.insert((task.id, task.attempts)) {
        return;
    }
    let fail = rng.gen_bool(opts.failure_rate);
    workers.spawn(work(pool.clone(), task.id, fail, opts.work));
}

async fn work(
    pool: TaskPoolManager,
    task_id: TaskId,
    fail: bool,
    duration: Duration,
) -> Result<(), PoolError> {
    pool.update_task_status(task_id, TaskStatus::InProgress, None)
        .await?;
    sleep(duration).await;

    let (status, report) = if fail {
        (TaskStatus::Failed, json!({ "error": "simulated failure" }))
    } else {
        (TaskStatus::Completed, json!({ "result": "ok" }))
    };
    let mut metadata = Map::new();
    metadata.insert("last_report".to_string(), report);
    let task = pool
        .update_task_status(task_id, status, Some(metadata))
        .await?;
    debug!(task_id = %task_id, status = %task.status, "worker reported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanAgent;

    fn opts(failure_rate: f64) -> SimulationOptions {
        SimulationOptions {
            failure_rate,
            work: Duration::from_millis(1),
            seed: Some(7),
            timeout: Duration::from_secs(30),
        }
    }

    fn pool() -> TaskPoolManager {
        TaskPoolManager::builder().build().unwrap()
    }

    #[tokio::test]
    async fn sample_plan_completes_without_failures() {
        let pool = pool();
        let plan = Plan::sample();

        let metrics = run_plan(&pool, &plan, &opts(0.0)).await.unwrap();
        assert_eq!(metrics.total_tasks, plan.tasks.len());
        assert_eq!(metrics.counts.completed, plan.tasks.len());
        assert_eq!(metrics.counts.failed, 0);
    }

    #[tokio::test]
    async fn always_failing_workers_exhaust_retries() {
        let pool = pool();
        let mut plan = Plan::sample();
        plan.tasks.truncate(1);

        let metrics = run_plan(&pool, &plan, &opts(1.0)).await.unwrap();
        assert_eq!(metrics.counts.failed, 1);
        let history = pool.assignment_history().await;
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn unrunnable_tasks_stop_the_simulation() {
        let pool = pool();
        let mut plan = Plan::sample();
        plan.agents = vec![PlanAgent {
            id: "docs-only".to_string(),
            skills: vec![],
            max_load: Some(1),
        }];

        let metrics = run_plan(&pool, &plan, &opts(0.0)).await.unwrap();
        // Only "docs" needs no skills; "schema" never runs, so its
        // dependents stay blocked.
        assert_eq!(metrics.counts.completed, 1);
        assert!(metrics.counts.blocked > 0);
    }

    #[tokio::test]
    async fn rejects_out_of_range_failure_rate() {
        let pool = pool();
        assert!(run_plan(&pool, &Plan::default(), &opts(1.5)).await.is_err());
    }
}
