//! Storage backends.
//!
//! Each backend is one level's physical storage. The [`Store`](crate::Store)
//! orchestrator only sees them through the [`Backend`] trait:
//! - **Memory**: non-persistent map, typically the cache level
//! - **`SQLite`**: JSON bodies in a single table, typically the primary level
//! - **Fault-injecting**: wraps another backend and fails on demand

// Allow significant_drop_tightening - dropping connection guards slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

mod fault;
mod memory;
pub mod sqlite;
pub mod traits;

pub use fault::{FaultInjectingBackend, FaultMode};
pub use memory::InMemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{Backend, Operation};
