//! Chained store orchestrator.
//!
//! A [`Store`] wraps one [`Backend`] (its *local* level) and may link to one
//! other store (its *next* level). Level 0 is the store callers talk to and
//! holds the authoritative data; each next level serves as a warm copy.
//!
//! # Operation Flow
//!
//! Every operation returns [`Emissions`]: the next level's answer first, then
//! the local answer. The local step never starts before the next-level step
//! has fully finished, and never starts at all if it failed.
//!
//! | Operation | Next level | Local level | On local failure |
//! |-----------|------------|-------------|------------------|
//! | `read_all` | warm read | read, then refresh next | none |
//! | `read_one` / `read_by_id` | warm read | read, then write back | none |
//! | `insert` | optimistic insert | insert, then write back | delete from next |
//! | `insert_or_update` | checkpoint, optimistic upsert | upsert, then write back | delete, restore checkpoint |
//! | `update` | existence check, optimistic update | update, then write back | delete, restore checkpoint |
//! | `delete` | optimistic delete | delete | upsert back into next |
//! | `delete_all` | optimistic clear | clear | copy local contents into next |
//!
//! An unfiltered `read_all` clears the next level before refreshing it, so no
//! stale record survives outside the fresh result. Filtered reads refresh
//! without clearing.
//!
//! # Failure Semantics
//!
//! Failures are never retried. After a local failure the rollback runs and
//! the local error is returned, even when the rollback itself fails. A
//! failure while writing back on the success path is returned as-is. Dropping
//! an [`Emissions`] stops the operation but leaves completed steps applied.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storechain::{Document, InMemoryBackend, SqliteBackend, Store};
//!
//! let cache = Arc::new(Store::new("cache", InMemoryBackend::<Document>::new()));
//! let primary = Store::new("primary", SqliteBackend::<Document>::in_memory("docs")?).link_to(cache);
//!
//! let answers = primary.read_by_id(1).collect_all().await?; // [warm, fresh]
//! ```

mod compensation;
mod emissions;

pub use emissions::Emissions;

use crate::models::{Filter, Optional, Record, RecordId, SortingMode, ids_of};
use crate::storage::{Backend, Operation};
use crate::{Error, Result};
use async_trait::async_trait;
use compensation::{Rollback, snapshot};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// One level of a store chain.
///
/// Cloning is cheap and yields a handle to the same backend and next level.
pub struct Store<R: Record> {
    name: Arc<str>,
    backend: Arc<dyn Backend<R>>,
    next: Option<Arc<Self>>,
}

impl<R: Record> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            backend: Arc::clone(&self.backend),
            next: self.next.clone(),
        }
    }
}

impl<R: Record> fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("next", &self.next.as_ref().map(|next| &next.name))
            .finish_non_exhaustive()
    }
}

impl<R: Record> Store<R> {
    /// Creates a store with no next level.
    #[must_use]
    pub fn new(name: impl Into<String>, backend: impl Backend<R> + 'static) -> Self {
        Self::from_shared(name, Arc::new(backend))
    }

    /// Creates a store over a backend that may be shared elsewhere.
    #[must_use]
    pub fn from_shared(name: impl Into<String>, backend: Arc<dyn Backend<R>>) -> Self {
        Self {
            name: Arc::from(name.into()),
            backend,
            next: None,
        }
    }

    /// Links this store to its next level.
    ///
    /// The link is fixed once the store is built; a chain is assembled from
    /// the innermost level outwards, so it can never form a cycle.
    #[must_use]
    pub fn link_to(mut self, next: Arc<Self>) -> Self {
        self.next = Some(next);
        self
    }

    /// Returns the level name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the local backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn Backend<R>> {
        &self.backend
    }

    /// Returns true if a next level is linked.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Returns the next level, if any.
    #[must_use]
    pub fn next(&self) -> Option<&Self> {
        self.next.as_deref()
    }

    /// Iterates over this level and every level behind it.
    pub fn levels(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |store| store.next())
    }

    /// Returns the number of levels, this one included.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels().count()
    }

    // --- reads ---

    /// Reads every record matching `filter`, sorted by `sort`.
    ///
    /// Emits the next level's set, then the local set. The local set is then
    /// written into the next level; an empty `filter` replaces the next
    /// level's contents entirely.
    pub fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Emissions<Vec<R>> {
        let operation = Operation::ReadAll;
        let span = self.span(operation);
        let this = self.clone();
        let (filter, sort) = (filter.clone(), sort.clone());

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.read_all(&filter, &sort).await }.instrument(span),
            ),
            Some(next) => {
                let warm = Self::read_all(&next, &filter, &sort);
                let fresh = async move {
                    let fresh = this.backend.read_all(&filter, &sort).await?;
                    this.refresh(&next, &filter, &fresh).await?;
                    Ok(fresh)
                };
                Emissions::concat(warm, Emissions::from_future(fresh.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    /// Reads the first record matching `filter` under `sort`.
    ///
    /// Emits the next level's answer, then the local one. A local hit is
    /// written back into the next level.
    pub fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Emissions<Optional<R>> {
        let operation = Operation::ReadOne;
        let span = self.span(operation);
        let this = self.clone();
        let (filter, sort) = (filter.clone(), sort.clone());

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.read_one(&filter, &sort).await }.instrument(span),
            ),
            Some(next) => {
                let warm = Self::read_one(&next, &filter, &sort);
                let fresh = async move {
                    let found = this.backend.read_one(&filter, &sort).await?;
                    this.write_back(&next, found.get().cloned().into_iter().collect())
                        .await?;
                    Ok(found)
                };
                Emissions::concat(warm, Emissions::from_future(fresh.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    /// Reads one record by id. Same flow as [`Store::read_one`].
    pub fn read_by_id(&self, id: RecordId) -> Emissions<Optional<R>> {
        let operation = Operation::ReadById;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.read_by_id(id).await }.instrument(span),
            ),
            Some(next) => {
                let warm = Self::read_by_id(&next, id);
                let fresh = async move {
                    let found = this.backend.read_by_id(id).await?;
                    this.write_back(&next, found.get().cloned().into_iter().collect())
                        .await?;
                    Ok(found)
                };
                Emissions::concat(warm, Emissions::from_future(fresh.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    // --- writes ---

    /// Inserts new records.
    ///
    /// On local failure the records are deleted from the next level and the
    /// local error is returned.
    pub fn insert(&self, records: Vec<R>) -> Emissions<Vec<R>> {
        let operation = Operation::Insert;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.insert(records).await }.instrument(span),
            ),
            Some(next) => {
                let optimistic = Self::insert(&next, records.clone());
                let local = async move {
                    match this.backend.insert(records.clone()).await {
                        Ok(written) => {
                            this.write_back(&next, written.clone()).await?;
                            Ok(written)
                        },
                        Err(cause) => {
                            Rollback::Remove(records)
                                .run(&this, &next, operation, &cause)
                                .await;
                            Err(cause)
                        },
                    }
                };
                Emissions::concat(optimistic, Emissions::from_future(local.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    /// Inserts or replaces records.
    ///
    /// The next level's current values are captured before anything is
    /// written. On local failure the optimistic records are deleted from the
    /// next level and the captured values, if any, are put back.
    pub fn insert_or_update(&self, records: Vec<R>) -> Emissions<Vec<R>> {
        let operation = Operation::InsertOrUpdate;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.insert_or_update(records).await }.instrument(span),
            ),
            Some(next) => {
                let outer = span.clone();
                Emissions::deferred(
                    async move {
                        let original = snapshot(&next, &ids_of(&records)).await?;
                        tracing::debug!(
                            next = next.name(),
                            checkpoint = original.len(),
                            "captured next-level checkpoint"
                        );
                        let optimistic = Self::insert_or_update(&next, records.clone());
                        let local = async move {
                            match this.backend.insert_or_update(records.clone()).await {
                                Ok(written) => {
                                    this.write_back(&next, written.clone()).await?;
                                    Ok(written)
                                },
                                Err(cause) => {
                                    Rollback::Restore {
                                        written: records,
                                        original,
                                    }
                                    .run(&this, &next, operation, &cause)
                                    .await;
                                    Err(cause)
                                },
                            }
                        };
                        Ok(Emissions::concat(
                            optimistic,
                            Emissions::from_future(local.instrument(span)),
                        ))
                    }
                    .instrument(outer),
                )
            },
        };
        self.observe(operation, emissions)
    }

    /// Replaces records that must already exist.
    ///
    /// With a next level, every id is looked up there first. If any is
    /// missing the call fails with [`Error::Validation`] before any write.
    /// Rollback deletes the optimistic records from the next level and puts
    /// the previous values back.
    pub fn update(&self, records: Vec<R>) -> Emissions<Vec<R>> {
        let operation = Operation::Update;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.update(records).await }.instrument(span),
            ),
            Some(next) => {
                let outer = span.clone();
                Emissions::deferred(
                    async move {
                        let ids = ids_of(&records);
                        let existing = snapshot(&next, &ids).await?;
                        validate_existing(&next, &ids, &existing)?;

                        let optimistic = Self::update(&next, records.clone());
                        let local = async move {
                            match this.backend.update(records.clone()).await {
                                Ok(written) => {
                                    this.write_back(&next, written.clone()).await?;
                                    Ok(written)
                                },
                                Err(cause) => {
                                    Rollback::Restore {
                                        written: records,
                                        original: existing,
                                    }
                                    .run(&this, &next, operation, &cause)
                                    .await;
                                    Err(cause)
                                },
                            }
                        };
                        Ok(Emissions::concat(
                            optimistic,
                            Emissions::from_future(local.instrument(span)),
                        ))
                    }
                    .instrument(outer),
                )
            },
        };
        self.observe(operation, emissions)
    }

    /// Deletes records, emitting the number removed at each level.
    ///
    /// On local failure the records are upserted back into the next level.
    pub fn delete(&self, records: Vec<R>) -> Emissions<usize> {
        let operation = Operation::Delete;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.delete(records).await }.instrument(span),
            ),
            Some(next) => {
                let optimistic = Self::delete(&next, records.clone());
                let local = async move {
                    match this.backend.delete(records.clone()).await {
                        Ok(removed) => Ok(removed),
                        Err(cause) => {
                            Rollback::Reinsert(records)
                                .run(&this, &next, operation, &cause)
                                .await;
                            Err(cause)
                        },
                    }
                };
                Emissions::concat(optimistic, Emissions::from_future(local.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    /// Deletes every record, emitting the number removed at each level.
    ///
    /// On local failure whatever the local backend still holds is copied
    /// into the next level. If that read fails too, nothing else is tried.
    pub fn delete_all(&self) -> Emissions<usize> {
        let operation = Operation::DeleteAll;
        let span = self.span(operation);
        let this = self.clone();

        let emissions = match self.next.clone() {
            None => Emissions::from_future(
                async move { this.backend.delete_all().await }.instrument(span),
            ),
            Some(next) => {
                let optimistic = Self::delete_all(&next);
                let local = async move {
                    match this.backend.delete_all().await {
                        Ok(removed) => Ok(removed),
                        Err(cause) => {
                            Rollback::Resync.run(&this, &next, operation, &cause).await;
                            Err(cause)
                        },
                    }
                };
                Emissions::concat(optimistic, Emissions::from_future(local.instrument(span)))
            },
        };
        self.observe(operation, emissions)
    }

    // --- helpers ---

    fn span(&self, operation: Operation) -> tracing::Span {
        tracing::debug_span!("store", store = %self.name, operation = operation.as_str())
    }

    /// Labels the stream and records its outcome once it ends.
    fn observe<T: Send + 'static>(&self, operation: Operation, emissions: Emissions<T>) -> Emissions<T> {
        let name = Arc::clone(&self.name);
        emissions
            .labelled(operation.as_str())
            .on_complete(move |error| {
                let status = if error.is_some() { "error" } else { "success" };
                metrics::counter!(
                    "store_operations_total",
                    "store" => name.to_string(),
                    "operation" => operation.as_str(),
                    "status" => status
                )
                .increment(1);
                if let Some(error) = error {
                    tracing::debug!(store = %name, operation = %operation, error = %error, "store operation failed");
                }
            })
    }

    /// Brings the next level in line with a fresh local read.
    async fn refresh(&self, next: &Self, filter: &Filter, fresh: &[R]) -> Result<()> {
        if filter.is_empty() {
            tracing::debug!(next = next.name(), "clearing next level before full refresh");
            Self::delete_all(next).settle().await?;
        }
        self.write_back(next, fresh.to_vec()).await
    }

    /// Upserts locally confirmed records into the next level.
    async fn write_back(&self, next: &Self, records: Vec<R>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            store = %self.name,
            next = next.name(),
            records = records.len(),
            "writing back to next level"
        );
        Self::insert_or_update(next, records).settle().await?;
        Ok(())
    }
}

/// Fails unless every id in `ids` has a record in `existing`.
fn validate_existing<R: Record>(next: &Store<R>, ids: &[RecordId], existing: &[R]) -> Result<()> {
    let found: BTreeSet<RecordId> = existing.iter().map(Record::id).collect();
    let missing: Vec<RecordId> = ids.iter().copied().filter(|id| !found.contains(id)).collect();
    if missing.is_empty() && existing.len() >= ids.len() {
        return Ok(());
    }
    Err(Error::Validation {
        reason: format!("records do not exist in level '{}'", next.name()),
        ids: missing,
    })
}

/// A store is itself a backend: each call settles to the local level's answer.
#[async_trait]
impl<R: Record> Backend<R> for Store<R> {
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>> {
        Self::read_all(self, filter, sort).settle().await
    }

    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>> {
        Self::read_one(self, filter, sort).settle().await
    }

    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>> {
        Self::read_by_id(self, id).settle().await
    }

    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>> {
        Self::insert(self, records).settle().await
    }

    async fn update(&self, records: Vec<R>) -> Result<Vec<R>> {
        Self::update(self, records).settle().await
    }

    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>> {
        Self::insert_or_update(self, records).settle().await
    }

    async fn delete(&self, records: Vec<R>) -> Result<usize> {
        Self::delete(self, records).settle().await
    }

    async fn delete_all(&self) -> Result<usize> {
        Self::delete_all(self).settle().await
    }
}
