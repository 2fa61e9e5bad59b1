//! Fault-injecting backend wrapper.
//!
//! Wraps any [`Backend`] and makes chosen operations fail on demand. Used to
//! exercise the compensation paths of a store chain.
//!
//! # Fault Modes
//!
//! | Mode | Inner backend touched | Result |
//! |------|-----------------------|--------|
//! | [`FaultMode::Before`] | no | error |
//! | [`FaultMode::After`] | yes, change applied | error |
//!
//! # Usage
//!
//! ```rust,ignore
//! use storechain::{Document, FaultInjectingBackend, InMemoryBackend, Operation};
//!
//! let backend = FaultInjectingBackend::new(InMemoryBackend::<Document>::new(), "primary");
//! backend.fail_on(Operation::InsertOrUpdate);
//! ```

use crate::models::{Filter, Optional, Record, RecordId, SortingMode};
use crate::storage::traits::{Backend, Operation};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

/// When an injected fault fires relative to the real operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail without calling the inner backend.
    Before,
    /// Run the inner operation, then fail anyway.
    After,
}

#[derive(Debug, Default)]
struct FaultState {
    faults: HashMap<Operation, FaultMode>,
    calls: HashMap<Operation, usize>,
}

/// Backend wrapper that fails selected operations.
#[derive(Debug)]
pub struct FaultInjectingBackend<B> {
    inner: B,
    state: Mutex<FaultState>,
    backend_name: &'static str,
}

impl<B> FaultInjectingBackend<B> {
    /// Wraps `inner` with no faults configured.
    #[must_use]
    pub fn new(inner: B, backend_name: &'static str) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState::default()),
            backend_name,
        }
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Makes `operation` fail before reaching the inner backend.
    pub fn fail_on(&self, operation: Operation) {
        self.set_fault(operation, Some(FaultMode::Before));
    }

    /// Makes `operation` fail after the inner backend applied it.
    pub fn fail_after(&self, operation: Operation) {
        self.set_fault(operation, Some(FaultMode::After));
    }

    /// Stops injecting faults into `operation`.
    pub fn recover(&self, operation: Operation) {
        self.set_fault(operation, None);
    }

    /// Stops injecting faults into every operation.
    pub fn clear_faults(&self) {
        self.with_state(|state| state.faults.clear());
    }

    /// Returns how many times `operation` was called, faulted or not.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.with_state(|state| state.calls.get(&operation).copied().unwrap_or(0))
    }

    fn set_fault(&self, operation: Operation, mode: Option<FaultMode>) {
        self.with_state(|state| match mode {
            Some(mode) => {
                state.faults.insert(operation, mode);
            },
            None => {
                state.faults.remove(&operation);
            },
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FaultState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(backend = self.backend_name, "fault state mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        };
        f(&mut guard)
    }

    fn injected(&self, operation: Operation) -> Error {
        Error::operation_failed(
            operation.as_str(),
            format!("injected fault in {}", self.backend_name),
        )
    }

    /// Runs `call` subject to any fault configured for `operation`.
    async fn guarded<T, F>(&self, operation: Operation, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let fault = self.with_state(|state| {
            *state.calls.entry(operation).or_insert(0) += 1;
            state.faults.get(&operation).copied()
        });

        match fault {
            None => call.await,
            Some(FaultMode::Before) => {
                tracing::debug!(backend = self.backend_name, operation = %operation, "injecting fault");
                Err(self.injected(operation))
            },
            Some(FaultMode::After) => {
                let applied = call.await;
                tracing::debug!(
                    backend = self.backend_name,
                    operation = %operation,
                    applied = applied.is_ok(),
                    "injecting fault after apply"
                );
                Err(self.injected(operation))
            },
        }
    }
}

#[async_trait]
impl<R: Record, B: Backend<R>> Backend<R> for FaultInjectingBackend<B> {
    async fn read_all(&self, filter: &Filter, sort: &SortingMode) -> Result<Vec<R>> {
        self.guarded(Operation::ReadAll, self.inner.read_all(filter, sort))
            .await
    }

    async fn read_one(&self, filter: &Filter, sort: &SortingMode) -> Result<Optional<R>> {
        self.guarded(Operation::ReadOne, self.inner.read_one(filter, sort))
            .await
    }

    async fn read_by_id(&self, id: RecordId) -> Result<Optional<R>> {
        self.guarded(Operation::ReadById, self.inner.read_by_id(id))
            .await
    }

    async fn insert(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.guarded(Operation::Insert, self.inner.insert(records))
            .await
    }

    async fn update(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.guarded(Operation::Update, self.inner.update(records))
            .await
    }

    async fn insert_or_update(&self, records: Vec<R>) -> Result<Vec<R>> {
        self.guarded(Operation::InsertOrUpdate, self.inner.insert_or_update(records))
            .await
    }

    async fn delete(&self, records: Vec<R>) -> Result<usize> {
        self.guarded(Operation::Delete, self.inner.delete(records))
            .await
    }

    async fn delete_all(&self) -> Result<usize> {
        self.guarded(Operation::DeleteAll, self.inner.delete_all())
            .await
    }
}
