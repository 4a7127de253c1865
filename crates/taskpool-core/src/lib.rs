//! taskpool-core
//!
//! In-memory task pool for a fleet of agents: task and agent registries,
//! weighted-score assignment, dependency blocking, retries, periodic
//! rebalancing and metrics, and a broadcast event stream.
//!
//! # Modules
//! - **domain**: ids, tasks, agents, assignment history, events, errors
//! - **ports**: seams to the outside (Clock, IdGenerator, ContextStore)
//! - **pool**: the engine (`TaskPoolState`, `TaskPoolManager`, maintenance loops)
//! - **impls**: in-memory port implementations

pub mod domain;
pub mod impls;
pub mod ports;
pub mod pool;

pub use domain::{
    AgentId, AgentRecord, AssignmentEntry, PoolError, PoolEvent, Priority, TaskId, TaskRecord,
    TaskSpec, TaskStatus,
};
pub use pool::{
    MaintenanceHandle, PoolConfig, PoolMetrics, PoolSnapshot, RebalanceReport, TaskPoolManager,
    spawn_maintenance,
};
