//! Pool module: registries, assignment, retries, rebalancing and metrics.
//!
//! `TaskPoolState` is the synchronous core; `TaskPoolManager` wraps it behind
//! an async lock and publishes its events. `spawn_maintenance` drives the
//! periodic rebalance and metrics work.

mod config;
mod dependency;
mod maintenance;
mod manager;
mod metrics;
mod queue;
mod retry;
mod scoring;
mod state;

pub use config::{ConfigError, PoolConfig, ScoringWeights};
pub use maintenance::{MaintenanceHandle, spawn_maintenance};
pub use manager::{TaskPoolBuilder, TaskPoolManager};
pub use metrics::{AgentWorkload, PoolMetrics, StatusCounts};
pub use retry::{FailureDecision, RetryPolicy};
pub use scoring::{is_eligible, score, select_agent, skill_matches};
pub use state::{AssignmentCandidate, PoolSnapshot, RebalanceReport, StatusChange, TaskPoolState};
