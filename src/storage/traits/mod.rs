//! Storage backend traits.

mod backend;

pub use backend::{Backend, Operation};
