//! Backend contract implemented by every storage level.
//!
//! A backend is one concrete place records live: a map in memory, a `SQLite`
//! table, a remote API. The [`Store`](crate::Store) orchestrator wraps exactly
//! one backend per level and never looks past this trait.
//!
//! # Error Modes and Guarantees
//!
//! Every operation may fail with an adapter-defined [`crate::Error`]. The
//! orchestrator treats such failures as opaque and always hands them back to
//! the caller after any compensation attempt.
//!
//! | Operation | Result | Absence |
//! |-----------|--------|---------|
//! | `read_all` | matching records | empty vec |
//! | `read_one` / `read_by_id` | [`Optional`] | `Optional::absent()` |
//! | `insert` / `update` / `insert_or_update` | written records | n/a |
//! | `delete` / `delete_all` | count removed | `0` |

use crate::Result;
use crate::models::{Filter, Optional, Record, RecordId, SortingMode};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Names of the backend operations, used for logs, metrics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// [`Backend::read_all`].
    ReadAll,
    /// [`Backend::read_one`].
    ReadOne,
    /// [`Backend::read_by_id`].
    ReadById,
    /// [`Backend::insert`].
    Insert,
    /// [`Backend::update`].
    Update,
    /// [`Backend::insert_or_update`].
    InsertOrUpdate,
    /// [`Backend::delete`].
    Delete,
    /// [`Backend::delete_all`].
    DeleteAll,
}

impl Operation {
    /// Returns the operation name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadAll => "read_all",
            Self::ReadOne => "read_one",
            Self::ReadById => "read_by_id",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::InsertOrUpdate => "insert_or_update",
            Self::Delete => "delete",
            Self::DeleteAll => "delete_all",
        }
    }

    /// Returns true for operations that modify a backend.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(self, Self::ReadAll | Self::ReadOne | Self::ReadById)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface of a storage backend.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn Backend<R>>`
/// - Use interior mutability (e.g., `RwLock`, `Mutex<Connection>`) for state
/// - Report "not found" through [`Optional`] or an empty vec, never an error
/// - `filter` and `sort` are this backend's to interpret
#[async_trait]
pub trait Backend<R: Record>: Send + Sync {
    /// Returns every record matching `filter`, ordered by `sort`.
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>>;

    /// Returns the first record matching `filter` under `sort`.
    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>>;

    /// Returns the record with the given id.
    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>>;

    /// Inserts new records.
    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>>;

    /// Updates existing records.
    async fn update(&self, records: Vec<R>) -> Result<Vec<R>>;

    /// Inserts or replaces records by id.
    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>>;

    /// Deletes records by id, returning how many were removed.
    async fn delete(&self, records: Vec<R>) -> Result<usize>;

    /// Deletes every record, returning how many were removed.
    async fn delete_all(&self) -> Result<usize>;
}

#[async_trait]
impl<R: Record, B: Backend<R> + ?Sized> Backend<R> for Arc<B> {
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>> {
        (**self).read_all(filter, sort).await
    }

    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>> {
        (**self).read_one(filter, sort).await
    }

    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>> {
        (**self).read_by_id(id).await
    }

    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>> {
        (**self).insert(records).await
    }

    async fn update(&self, records: Vec<R>) -> Result<Vec<R>> {
        (**self).update(records).await
    }

    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>> {
        (**self).insert_or_update(records).await
    }

    async fn delete(&self, records: Vec<R>) -> Result<usize> {
        (**self).delete(records).await
    }

    async fn delete_all(&self) -> Result<usize> {
        (**self).delete_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::ReadAll.as_str(), "read_all");
        assert_eq!(Operation::InsertOrUpdate.to_string(), "insert_or_update");
        assert_eq!(Operation::DeleteAll.to_string(), "delete_all");
    }

    #[test]
    fn test_operation_is_write() {
        assert!(!Operation::ReadById.is_write());
        assert!(Operation::Update.is_write());
        assert!(Operation::Delete.is_write());
    }
}
