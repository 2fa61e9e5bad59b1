//! # Storechain
//!
//! Typed record storage through a chain of storage levels.
//!
//! A [`Store`] wraps one [`Backend`] and optionally links to exactly one other
//! store, the next level. Callers only talk to the outermost store (level 0);
//! every operation fans out to the next level, merges both answers into one
//! ordered [`Emissions`] stream, and reverts next-level writes when the local
//! write fails.
//!
//! ## Features
//!
//! - Cache-first reads followed by a write-through refresh of the next level
//! - Optimistic next-level writes with best-effort rollback
//! - Strict updates that refuse to touch records that do not exist yet
//! - In-memory, `SQLite` and fault-injecting backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storechain::{Document, InMemoryBackend, SqliteBackend, Store};
//!
//! let cache = Arc::new(Store::new("cache", InMemoryBackend::<Document>::new()));
//! let primary = Store::new("primary", SqliteBackend::<Document>::in_memory("docs")?).link_to(cache);
//!
//! let written = primary.insert_or_update(vec![Document::new(1)]).settle().await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;
pub mod store;

pub use config::{BackendKind, LevelConfig, StoreChainConfig};
pub use models::{
    Condition, Document, Filter, FilterType, Optional, Record, RecordId, SortType, SortingMode,
};
pub use storage::{Backend, FaultInjectingBackend, InMemoryBackend, Operation, SqliteBackend};
pub use store::{Emissions, Store};

/// Error type for storechain operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed sort spec, bad table name, bad config value |
/// | `OperationFailed` | A backend read or write fails |
/// | `Validation` | A strict update targets records that do not exist |
/// | `EmptyResult` | An emission stream finished without any value |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Sort keys and sort directions have different lengths
    /// - A `SQLite` table name is not a plain identifier
    /// - A configuration file has no levels or an unknown backend
    /// - CLI arguments cannot be parsed as records
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A backend operation failed.
    ///
    /// Raised when:
    /// - `SQLite` queries or (de)serialization of stored bodies fail
    /// - The in-memory backend rejects a duplicate insert or a missing update
    /// - A fault was injected by [`FaultInjectingBackend`]
    /// - A blocking task panicked or was cancelled
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A strict update was rejected before any write happened.
    #[error("validation failed: {reason} (ids: {ids:?})")]
    Validation {
        /// Why the request was rejected.
        reason: String,
        /// The record ids that caused the rejection.
        ids: Vec<RecordId>,
    },

    /// An emission stream completed without producing a value.
    #[error("operation '{operation}' produced no result")]
    EmptyResult {
        /// The operation whose stream was empty.
        operation: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::OperationFailed`].
    pub fn operation_failed(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` for validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Result type alias for storechain operations.
pub type Result<T> = std::result::Result<T, Error>;
