//! Ports - seams to the outside world.
//!
//! Each trait hides one collaborator so the pool engine can be tested with
//! deterministic or in-memory implementations.

pub mod clock;
pub mod context_store;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::context_store::{ContextError, ContextStore};
pub use self::id_generator::{IdGenerator, UlidGenerator};
