//! Checkpoints and rollback steps for next-level writes.
//!
//! A write first lands in the next level, then in the local backend. When
//! the local write fails, the matching [`Rollback`] undoes what the next
//! level received. Rollback failures are logged and counted, never returned:
//! the caller always sees the local failure.

use super::Store;
use crate::models::{Filter, Record, RecordId, SortingMode};
use crate::storage::{Backend, Operation};
use crate::{Error, Result};

/// Reads the next level's current value for each id.
///
/// Ids with no stored record are skipped, so the result may be shorter than
/// `ids`. Reads go straight to the next level's backend and have no side
/// effects further down the chain.
pub async fn snapshot<R: Record>(next: &Store<R>, ids: &[RecordId]) -> Result<Vec<R>> {
    let mut original = Vec::with_capacity(ids.len());
    for &id in ids {
        if let Some(record) = next.backend().read_by_id(id).await?.into_inner() {
            original.push(record);
        }
    }
    Ok(original)
}

/// How to undo a next-level write after the local write failed.
#[derive(Debug)]
pub enum Rollback<R> {
    /// Delete records the next level received optimistically.
    Remove(Vec<R>),
    /// Delete the optimistic records, then put the checkpoint back.
    ///
    /// An empty checkpoint means the records were new, so only the delete runs.
    Restore {
        /// Records written optimistically.
        written: Vec<R>,
        /// Next-level values captured before the write.
        original: Vec<R>,
    },
    /// Upsert records whose local deletion failed back into the next level.
    Reinsert(Vec<R>),
    /// Copy whatever the local backend still holds into the next level.
    Resync,
}

impl<R: Record> Rollback<R> {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Remove(_) => "remove",
            Self::Restore { .. } => "restore",
            Self::Reinsert(_) => "reinsert",
            Self::Resync => "resync",
        }
    }

    /// Applies the rollback to `next`, swallowing any failure.
    pub async fn run(self, store: &Store<R>, next: &Store<R>, operation: Operation, cause: &Error) {
        let kind = self.kind();
        tracing::warn!(
            store = store.name(),
            next = next.name(),
            operation = %operation,
            rollback = kind,
            error = %cause,
            "local write failed, compensating next level"
        );

        let outcome = match self.apply(store, next).await {
            Ok(()) => "success",
            Err(e) => {
                tracing::warn!(
                    store = store.name(),
                    next = next.name(),
                    operation = %operation,
                    rollback = kind,
                    error = %e,
                    "compensation failed, next level may be inconsistent"
                );
                "error"
            },
        };

        metrics::counter!(
            "store_compensations_total",
            "store" => store.name().to_string(),
            "operation" => operation.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    async fn apply(self, store: &Store<R>, next: &Store<R>) -> Result<()> {
        match self {
            Self::Remove(records) => {
                Store::delete(next, records).settle().await?;
            },
            Self::Restore { written, original } => {
                Store::delete(next, written).settle().await?;
                if !original.is_empty() {
                    Store::insert_or_update(next, original).settle().await?;
                }
            },
            Self::Reinsert(records) => {
                Store::insert_or_update(next, records).settle().await?;
            },
            Self::Resync => {
                let current = store
                    .backend()
                    .read_all(&Filter::new(), &SortingMode::default())
                    .await?;
                if !current.is_empty() {
                    Store::insert_or_update(next, current).settle().await?;
                }
            },
        }
        Ok(())
    }
}
