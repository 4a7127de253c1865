//! Domain model (ids, tasks, agents, history, events, errors).

pub mod agent;
pub mod errors;
pub mod events;
pub mod history;
pub mod ids;
pub mod task;

pub use agent::AgentRecord;
pub use errors::PoolError;
pub use events::PoolEvent;
pub use history::AssignmentEntry;
pub use ids::{AgentId, TaskId};
pub use task::{Priority, TaskRecord, TaskSpec, TaskStatus, CONTEXT_HASH_KEY};
