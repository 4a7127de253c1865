//! Impls - in-memory implementations of the ports.

pub mod inmem_context;

pub use self::inmem_context::{ContextShare, InMemoryContextStore};
