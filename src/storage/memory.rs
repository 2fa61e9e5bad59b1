//! In-memory backend.
//!
//! Provides a fast, non-persistent implementation of [`Backend`] for use as a
//! cache level, in unit tests, and in development. Every instance owns its
//! own map; nothing is shared between instances.

use crate::models::{Filter, Optional, Record, RecordId, SortingMode, compare_values};
use crate::storage::traits::Backend;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory backend keyed by record id.
///
/// Filters and sort rules are evaluated against the record's JSON form, so
/// any field `serde` emits can be queried.
///
/// # Example
///
/// ```rust,ignore
/// use storechain::{Document, InMemoryBackend};
///
/// let backend = InMemoryBackend::with_records([Document::new(1), Document::new(2)]);
/// assert_eq!(backend.len(), 2);
/// ```
#[derive(Debug)]
pub struct InMemoryBackend<R> {
    records: RwLock<BTreeMap<RecordId, R>>,
}

impl<R> Default for InMemoryBackend<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R: Record + Serialize> InMemoryBackend<R> {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend seeded with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records.into_iter().map(|r| (r.id(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Returns the number of records stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inspect().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a record with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.inspect().contains_key(&id)
    }

    /// Returns a copy of every record, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<R> {
        self.inspect().values().cloned().collect()
    }

    /// Read access for the inspection helpers, recovering a poisoned lock.
    fn inspect(&self) -> RwLockReadGuard<'_, BTreeMap<RecordId, R>> {
        self.records.read().unwrap_or_else(|poisoned| {
            tracing::warn!("in-memory backend lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read_guard(&self, operation: &str) -> Result<RwLockReadGuard<'_, BTreeMap<RecordId, R>>> {
        self.records
            .read()
            .map_err(|_| Error::operation_failed(operation, "lock poisoned"))
    }

    fn write_guard(
        &self,
        operation: &str,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<RecordId, R>>> {
        self.records
            .write()
            .map_err(|_| Error::operation_failed(operation, "lock poisoned"))
    }

    /// Returns matching records ordered by `sort`.
    fn select(
        &self,
        operation: &str,
        filter: &Filter,
        sort: &SortingMode,
    ) -> Result<Vec<R>> {
        let records = self.read_guard(operation)?;
        let mut rows = records
            .values()
            .map(|record| {
                let json = serde_json::to_value(record)
                    .map_err(|e| Error::operation_failed(operation, e))?;
                Ok((record, json))
            })
            .collect::<Result<Vec<_>>>()?;

        rows.retain(|(record, json)| Self::matches(*record, json, filter));

        if !sort.is_unordered() {
            rows.sort_by(|(left, left_json), (right, right_json)| {
                Self::compare(*left, left_json, *right, right_json, sort)
            });
        }

        Ok(rows.into_iter().map(|(record, _)| record.clone()).collect())
    }

    /// Looks up a field, resolving `id` through [`Record::id`].
    fn field(record: &R, json: &Value, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::from(record.id()));
        }
        json.get(name).cloned()
    }

    fn matches(record: &R, json: &Value, filter: &Filter) -> bool {
        filter
            .iter()
            .all(|(name, condition)| condition.matches(Self::field(record, json, name).as_ref()))
    }

    fn compare(left: &R, left_json: &Value, right: &R, right_json: &Value, sort: &SortingMode) -> Ordering {
        for (name, sort_type) in sort.entries() {
            let l = Self::field(left, left_json, name);
            let r = Self::field(right, right_json, name);
            // Missing fields sort last in either direction.
            let ordering = match (l, r) {
                (Some(l), Some(r)) => {
                    sort_type.apply(compare_values(&l, &r).unwrap_or(Ordering::Equal))
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[async_trait]
impl<R: Record + Serialize> Backend<R> for InMemoryBackend<R> {
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>> {
        self.select("read_all", filter, sort)
    }

    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>> {
        let rows = self.select("read_one", filter, sort)?;
        Ok(Optional::wrap(rows.into_iter().next()))
    }

    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>> {
        let records = self.read_guard("read_by_id")?;
        Ok(Optional::wrap(records.get(&id).cloned()))
    }

    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>> {
        let mut stored = self.write_guard("insert")?;
        let duplicates: Vec<RecordId> = records
            .iter()
            .map(Record::id)
            .filter(|id| stored.contains_key(id))
            .collect();
        if !duplicates.is_empty() {
            return Err(Error::operation_failed(
                "insert",
                format!("records already exist: {duplicates:?}"),
            ));
        }
        for record in &records {
            stored.insert(record.id(), record.clone());
        }
        Ok(records)
    }

    async fn update(&self, records: Vec<R>) -> Result<Vec<R>> {
        let mut stored = self.write_guard("update")?;
        let missing: Vec<RecordId> = records
            .iter()
            .map(Record::id)
            .filter(|id| !stored.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(Error::operation_failed(
                "update",
                format!("records do not exist: {missing:?}"),
            ));
        }
        for record in &records {
            stored.insert(record.id(), record.clone());
        }
        Ok(records)
    }

    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>> {
        let mut stored = self.write_guard("insert_or_update")?;
        for record in &records {
            stored.insert(record.id(), record.clone());
        }
        Ok(records)
    }

    async fn delete(&self, records: Vec<R>) -> Result<usize> {
        let mut stored = self.write_guard("delete")?;
        Ok(records
            .iter()
            .filter(|record| stored.remove(&record.id()).is_some())
            .count())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut stored = self.write_guard("delete_all")?;
        let count = stored.len();
        stored.clear();
        Ok(count)
    }
}
