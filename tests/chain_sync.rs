//! Store chain synchronization and compensation tests.
//!
//! Covers the two-level chain behaviour end to end:
//! - Writes propagate from level 0 into the next level
//! - Local failures roll the next level back to its previous state
//! - Strict updates reject unknown records before writing
//! - Unfiltered reads replace the next level's contents

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use storechain::{
    Document, Error, FaultInjectingBackend, Filter, InMemoryBackend, Operation, RecordId,
    SortingMode, Store,
};

type Level = FaultInjectingBackend<InMemoryBackend<Document>>;

/// A two-level chain plus handles on both backends.
struct Chain {
    store: Store<Document>,
    level0: Arc<Level>,
    level1: Arc<Level>,
}

fn level(name: &'static str, records: Vec<Document>) -> Arc<Level> {
    Arc::new(FaultInjectingBackend::new(
        InMemoryBackend::with_records(records),
        name,
    ))
}

fn chain(level0_records: Vec<Document>, level1_records: Vec<Document>) -> Chain {
    let level0 = level("level0", level0_records);
    let level1 = level("level1", level1_records);
    let next: Store<Document> = Store::from_shared("level1", level1.clone());
    let store = Store::<Document>::from_shared("level0", level0.clone()).link_to(Arc::new(next));
    Chain {
        store,
        level0,
        level1,
    }
}

fn available(id: RecordId, value: bool) -> Document {
    Document::new(id).with_field("available", value)
}

fn ids(records: &[Document]) -> Vec<RecordId> {
    records.iter().map(|r| r.id).collect()
}

fn stored(backend: &Level, id: RecordId) -> Option<Document> {
    backend.inner().snapshot().into_iter().find(|r| r.id == id)
}

// ============================================================================
// Upsert
// ============================================================================

#[tokio::test]
async fn test_upsert_success_propagates_down_the_chain() {
    let chain = chain(vec![], vec![]);

    chain
        .store
        .insert_or_update(vec![available(99, true)])
        .settle()
        .await
        .unwrap();

    let answers = chain.store.read_by_id(99).collect_all().await.unwrap();
    assert_eq!(answers.len(), 2);
    for answer in answers {
        assert_eq!(
            answer.get().and_then(|d| d.field("available")),
            Some(&Value::Bool(true))
        );
    }
    assert_eq!(stored(&chain.level0, 99), Some(available(99, true)));
    assert_eq!(stored(&chain.level1, 99), Some(available(99, true)));
}

#[tokio::test]
async fn test_upsert_rollback_restores_prior_value() {
    let chain = chain(vec![], vec![available(99, true)]);
    chain.level0.fail_on(Operation::InsertOrUpdate);

    let result = chain
        .store
        .insert_or_update(vec![available(99, false)])
        .settle()
        .await;

    assert!(result.is_err());
    assert_eq!(stored(&chain.level1, 99), Some(available(99, true)));
    assert!(!chain.level0.inner().contains(99));
}

#[tokio::test]
async fn test_upsert_rollback_of_new_record_leaves_no_orphan() {
    let chain = chain(vec![], vec![]);
    chain.level0.fail_on(Operation::InsertOrUpdate);

    let result = chain
        .store
        .insert_or_update(vec![available(77, true)])
        .settle()
        .await;

    assert!(result.is_err());
    assert!(!chain.level1.inner().contains(77));
    assert!(!chain.level0.inner().contains(77));
}

#[tokio::test]
async fn test_upsert_rollback_handles_mixed_batch() {
    let chain = chain(vec![], vec![available(1, true)]);
    chain.level0.fail_on(Operation::InsertOrUpdate);

    let result = chain
        .store
        .insert_or_update(vec![available(1, false), available(2, false)])
        .settle()
        .await;

    assert!(result.is_err());
    assert_eq!(chain.level1.inner().snapshot(), vec![available(1, true)]);
}

#[tokio::test]
async fn test_upsert_checkpoint_failure_writes_nothing() {
    let chain = chain(vec![], vec![]);
    chain.level1.fail_on(Operation::ReadById);

    let result = chain
        .store
        .insert_or_update(vec![available(5, true)])
        .settle()
        .await;

    assert!(result.is_err());
    assert_eq!(chain.level1.calls(Operation::InsertOrUpdate), 0);
    assert_eq!(chain.level0.calls(Operation::InsertOrUpdate), 0);
}

#[tokio::test]
async fn test_next_level_failure_skips_local_write() {
    let chain = chain(vec![], vec![]);
    chain.level1.fail_on(Operation::InsertOrUpdate);

    let result = chain
        .store
        .insert_or_update(vec![available(5, true)])
        .settle()
        .await;

    assert!(result.is_err());
    assert_eq!(chain.level0.calls(Operation::InsertOrUpdate), 0);
    assert!(chain.level0.inner().is_empty());
}

#[tokio::test]
async fn test_compensation_failure_keeps_original_error() {
    let chain = chain(vec![], vec![]);
    chain.level0.fail_on(Operation::InsertOrUpdate);
    chain.level1.fail_on(Operation::Delete);

    let err = chain
        .store
        .insert_or_update(vec![available(8, true)])
        .settle()
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "operation 'insert_or_update' failed: injected fault in level0"
    );
    // The failed rollback leaves the optimistic write behind.
    assert!(chain.level1.inner().contains(8));
    assert_eq!(chain.level1.calls(Operation::Delete), 1);
}

// ============================================================================
// Insert
// ============================================================================

#[tokio::test]
async fn test_insert_writes_both_levels() {
    let chain = chain(vec![], vec![]);

    let answers = chain
        .store
        .insert(vec![available(1, true), available(2, false)])
        .collect_all()
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    assert_eq!(ids(&answers[1]), vec![1, 2]);
    assert_eq!(chain.level0.inner().len(), 2);
    assert_eq!(chain.level1.inner().len(), 2);
}

#[tokio::test]
async fn test_insert_failure_deletes_from_next_level() {
    // Level 0 already holds id 5, so its insert is rejected.
    let chain = chain(vec![available(5, true)], vec![]);

    let result = chain.store.insert(vec![available(5, false)]).settle().await;

    assert!(matches!(result, Err(Error::OperationFailed { .. })));
    assert!(!chain.level1.inner().contains(5));
    assert_eq!(stored(&chain.level0, 5), Some(available(5, true)));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_unknown_record_fails_validation() {
    let chain = chain(
        vec![available(1, true), available(2, true)],
        vec![available(1, true), available(2, true)],
    );

    let err = chain
        .store
        .update(vec![available(123, false)])
        .settle()
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(matches!(err, Error::Validation { ref ids, .. } if ids == &vec![123]));
    assert_eq!(chain.level0.inner().len(), 2);
    assert_eq!(chain.level1.inner().len(), 2);
    assert_eq!(chain.level0.calls(Operation::Update), 0);
    assert_eq!(chain.level1.calls(Operation::Update), 0);
}

#[tokio::test]
async fn test_update_success_propagates() {
    let chain = chain(vec![available(1, true)], vec![available(1, true)]);

    chain
        .store
        .update(vec![available(1, false)])
        .settle()
        .await
        .unwrap();

    assert_eq!(stored(&chain.level0, 1), Some(available(1, false)));
    assert_eq!(stored(&chain.level1, 1), Some(available(1, false)));
}

#[tokio::test]
async fn test_update_failure_restores_original() {
    let chain = chain(vec![available(1, true)], vec![available(1, true)]);
    chain.level0.fail_on(Operation::Update);

    let result = chain.store.update(vec![available(1, false)]).settle().await;

    assert!(matches!(result, Err(Error::OperationFailed { .. })));
    assert_eq!(stored(&chain.level1, 1), Some(available(1, true)));
    assert_eq!(chain.level1.calls(Operation::Delete), 1);
    assert_eq!(stored(&chain.level0, 1), Some(available(1, true)));
}

#[tokio::test]
async fn test_update_rollback_failure_keeps_original_error() {
    let chain = chain(vec![available(1, true)], vec![available(1, true)]);
    chain.level0.fail_on(Operation::Update);
    chain.level1.fail_on(Operation::Delete);

    let err = chain
        .store
        .update(vec![available(1, false)])
        .settle()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "operation 'update' failed: injected fault in level0");
    // The rollback stopped at its first step, so the optimistic value stays.
    assert_eq!(stored(&chain.level1, 1), Some(available(1, false)));
    assert_eq!(chain.level1.calls(Operation::Delete), 1);
    assert_eq!(chain.level1.calls(Operation::InsertOrUpdate), 0);
}

#[tokio::test]
async fn test_update_without_next_level_is_direct() {
    let store: Store<Document> = Store::new(
        "solo",
        InMemoryBackend::with_records([available(1, true)]),
    );

    store.update(vec![available(1, false)]).settle().await.unwrap();
    let err = store.update(vec![available(2, false)]).settle().await.unwrap_err();
    assert!(matches!(err, Error::OperationFailed { .. }));
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_emits_counts_per_level() {
    let chain = chain(
        vec![available(1, true), available(2, true)],
        vec![available(1, true)],
    );

    let counts = chain
        .store
        .delete(vec![Document::new(1), Document::new(2)])
        .collect_all()
        .await
        .unwrap();

    assert_eq!(counts, vec![1, 2]);
    assert!(chain.level0.inner().is_empty());
    assert!(chain.level1.inner().is_empty());
}

#[tokio::test]
async fn test_delete_failure_reinserts_into_next_level() {
    let chain = chain(
        vec![available(1, true), available(2, true)],
        vec![available(1, true), available(2, true)],
    );
    chain.level0.fail_on(Operation::Delete);

    let result = chain.store.delete(vec![available(1, true)]).settle().await;

    assert!(result.is_err());
    assert_eq!(stored(&chain.level1, 1), Some(available(1, true)));
    assert_eq!(chain.level1.inner().len(), 2);
}

#[tokio::test]
async fn test_delete_rollback_failure_keeps_original_error() {
    let chain = chain(vec![available(1, true)], vec![available(1, true)]);
    chain.level0.fail_on(Operation::Delete);
    chain.level1.fail_on(Operation::InsertOrUpdate);

    let err = chain
        .store
        .delete(vec![available(1, true)])
        .settle()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "operation 'delete' failed: injected fault in level0");
    assert!(!chain.level1.inner().contains(1));
    assert!(chain.level0.inner().contains(1));
    assert_eq!(chain.level1.calls(Operation::InsertOrUpdate), 1);
}

#[tokio::test]
async fn test_delete_all_recovers_from_partial_failure() {
    let chain = chain(
        vec![available(1, true), available(2, true)],
        vec![available(1, true), available(2, true), available(3, true)],
    );
    chain.level0.fail_after(Operation::DeleteAll);

    let result = chain.store.delete_all().settle().await;
    assert!(result.is_err());

    // Level 0 was cleared before failing, so the resync has nothing to copy.
    assert!(chain.level0.inner().is_empty());
    assert!(chain.level1.inner().is_empty());
}

#[tokio::test]
async fn test_delete_all_failure_resyncs_next_level() {
    let chain = chain(
        vec![available(1, true), available(2, true)],
        vec![available(1, true)],
    );
    chain.level0.fail_on(Operation::DeleteAll);

    let result = chain.store.delete_all().settle().await;

    assert!(result.is_err());
    assert_eq!(ids(&chain.level1.inner().snapshot()), vec![1, 2]);
}

#[tokio::test]
async fn test_delete_all_recovery_read_failure_is_swallowed() {
    let chain = chain(vec![available(1, true)], vec![available(1, true)]);
    chain.level0.fail_on(Operation::DeleteAll);
    chain.level0.fail_on(Operation::ReadAll);

    let err = chain.store.delete_all().settle().await.unwrap_err();

    assert!(err.to_string().contains("delete_all"));
    assert!(chain.level1.inner().is_empty());
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_unfiltered_read_replaces_next_level() {
    let chain = chain(
        vec![available(10, true), available(20, true), available(30, true)],
        vec![available(1, false), available(2, false), available(3, false)],
    );

    let answers = chain
        .store
        .read_all(&Filter::new(), &SortingMode::default())
        .collect_all()
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    assert_eq!(ids(&answers[0]), vec![1, 2, 3]);
    assert_eq!(ids(&answers[1]), vec![10, 20, 30]);
    assert_eq!(ids(&chain.level1.inner().snapshot()), vec![10, 20, 30]);
}

#[tokio::test]
async fn test_filtered_read_refreshes_without_clearing() {
    let chain = chain(
        vec![available(10, true), available(11, false)],
        vec![available(1, true), available(2, false)],
    );

    let fresh = chain
        .store
        .read_all(&Filter::equal("available", true), &SortingMode::default())
        .settle()
        .await
        .unwrap();

    assert_eq!(ids(&fresh), vec![10]);
    assert_eq!(ids(&chain.level1.inner().snapshot()), vec![1, 2, 10]);
    assert_eq!(chain.level1.calls(Operation::DeleteAll), 0);
}

#[tokio::test]
async fn test_read_one_writes_back_hit() {
    let chain = chain(vec![available(1, true), available(2, true)], vec![]);

    let answers = chain
        .store
        .read_one(
            &Filter::equal("available", true),
            &SortingMode::with("id", storechain::SortType::Descending),
        )
        .collect_all()
        .await
        .unwrap();

    assert!(answers[0].is_absent());
    assert_eq!(answers[1].get().map(|d| d.id), Some(2));
    assert_eq!(ids(&chain.level1.inner().snapshot()), vec![2]);
}

#[tokio::test]
async fn test_read_miss_writes_nothing_back() {
    let chain = chain(vec![], vec![]);

    let found = chain.store.read_by_id(42).settle().await.unwrap();

    assert!(found.is_absent());
    assert_eq!(chain.level1.calls(Operation::InsertOrUpdate), 0);
}

#[tokio::test]
async fn test_warm_read_failure_ends_stream() {
    let chain = chain(vec![available(1, true)], vec![]);
    chain.level1.fail_on(Operation::ReadAll);

    let result = chain
        .store
        .read_all(&Filter::new(), &SortingMode::default())
        .collect_all()
        .await;

    assert!(result.is_err());
    assert_eq!(chain.level0.calls(Operation::ReadAll), 0);
}

// ============================================================================
// Chains and cancellation
// ============================================================================

#[tokio::test]
async fn test_three_level_chain_round_trip() {
    let level2 = level("level2", vec![]);
    let level1 = level("level1", vec![]);
    let level0 = level("level0", vec![]);
    let store2: Store<Document> = Store::from_shared("level2", level2.clone());
    let store1 = Store::<Document>::from_shared("level1", level1.clone()).link_to(Arc::new(store2));
    let store0 = Store::<Document>::from_shared("level0", level0.clone()).link_to(Arc::new(store1));
    assert_eq!(store0.depth(), 3);

    let doc = Document::new(7).with_field("tags", json!(["a", "b"]));
    store0.insert_or_update(vec![doc.clone()]).settle().await.unwrap();

    for backend in [&level0, &level1, &level2] {
        assert_eq!(backend.inner().snapshot(), vec![doc.clone()]);
    }

    let answers = store0.read_by_id(7).collect_all().await.unwrap();
    assert_eq!(answers.len(), 3);
    assert!(answers.iter().all(|found| found.get() == Some(&doc)));
}

#[tokio::test]
async fn test_dropping_stream_leaves_completed_steps_applied() {
    let chain = chain(vec![], vec![]);

    let mut emissions = chain.store.insert_or_update(vec![available(3, true)]);
    let first = emissions.next().await.unwrap().unwrap();
    assert_eq!(ids(&first), vec![3]);
    drop(emissions);

    assert!(chain.level1.inner().contains(3));
    assert!(!chain.level0.inner().contains(3));
    assert_eq!(chain.level0.calls(Operation::InsertOrUpdate), 0);
}
