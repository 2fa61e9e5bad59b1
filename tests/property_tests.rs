//! Property-based tests for store chains.
//!
//! Uses proptest to verify invariants across random inputs:
//! - An upsert followed by a read returns the written records at every level
//! - An unfiltered read leaves the next level identical to level 0
//! - A failed local upsert leaves the next level as it was
//! - Deleting a batch removes exactly the stored ids

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use storechain::cli::parse_clause;
use storechain::{
    Document, FaultInjectingBackend, Filter, FilterType, InMemoryBackend, Operation, RecordId,
    SortingMode, Store,
};

type Level = FaultInjectingBackend<InMemoryBackend<Document>>;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn docs(ids: &BTreeSet<RecordId>, tag: &str) -> Vec<Document> {
    ids.iter()
        .map(|&id| Document::new(id).with_field("tag", tag))
        .collect()
}

fn chain(local: Vec<Document>, next: Vec<Document>) -> (Store<Document>, Arc<Level>, Arc<Level>) {
    let level0 = Arc::new(FaultInjectingBackend::new(
        InMemoryBackend::with_records(local),
        "level0",
    ));
    let level1 = Arc::new(FaultInjectingBackend::new(
        InMemoryBackend::with_records(next),
        "level1",
    ));
    let next_store: Store<Document> = Store::from_shared("level1", level1.clone());
    let store =
        Store::<Document>::from_shared("level0", level0.clone()).link_to(Arc::new(next_store));
    (store, level0, level1)
}

proptest! {
    /// Property: records written through the chain read back from every level.
    #[test]
    fn prop_upsert_then_read_round_trips(ids in prop::collection::btree_set(0i64..500, 1..20)) {
        let rt = runtime();
        let (store, level0, level1) = chain(vec![], vec![]);
        let written = docs(&ids, "new");

        rt.block_on(store.insert_or_update(written.clone()).settle()).unwrap();

        for &id in &ids {
            let answers = rt.block_on(store.read_by_id(id).collect_all()).unwrap();
            prop_assert_eq!(answers.len(), 2);
            for answer in answers {
                prop_assert_eq!(answer.get().map(|d| d.id), Some(id));
            }
        }
        prop_assert_eq!(level0.inner().snapshot(), written.clone());
        prop_assert_eq!(level1.inner().snapshot(), written);
    }

    /// Property: an unfiltered read makes the next level mirror level 0.
    #[test]
    fn prop_full_read_converges(
        local in prop::collection::btree_set(0i64..100, 0..15),
        stale in prop::collection::btree_set(0i64..100, 0..15),
    ) {
        let rt = runtime();
        let (store, level0, level1) = chain(docs(&local, "fresh"), docs(&stale, "stale"));

        let answers = rt
            .block_on(store.read_all(&Filter::new(), &SortingMode::default()).collect_all())
            .unwrap();

        prop_assert_eq!(answers.len(), 2);
        prop_assert_eq!(&answers[0], &docs(&stale, "stale"));
        prop_assert_eq!(&answers[1], &docs(&local, "fresh"));
        prop_assert_eq!(level1.inner().snapshot(), level0.inner().snapshot());
    }

    /// Property: a failed local upsert leaves the next level unchanged.
    #[test]
    fn prop_failed_upsert_restores_next_level(
        existing in prop::collection::btree_set(0i64..50, 0..10),
        incoming in prop::collection::btree_set(0i64..50, 1..10),
    ) {
        let rt = runtime();
        let before = docs(&existing, "before");
        let (store, level0, level1) = chain(vec![], before.clone());
        level0.fail_on(Operation::InsertOrUpdate);

        let result = rt.block_on(store.insert_or_update(docs(&incoming, "after")).settle());

        prop_assert!(result.is_err());
        prop_assert_eq!(level1.inner().snapshot(), before);
        prop_assert!(level0.inner().is_empty());
    }

    /// Property: delete emits how many stored records each level removed.
    #[test]
    fn prop_delete_counts_match(
        stored in prop::collection::btree_set(0i64..60, 0..20),
        targets in prop::collection::btree_set(0i64..60, 1..20),
    ) {
        let rt = runtime();
        let (store, level0, level1) = chain(docs(&stored, "x"), docs(&stored, "x"));
        let expected = stored.intersection(&targets).count();

        let counts = rt
            .block_on(store.delete(docs(&targets, "x")).collect_all())
            .unwrap();

        prop_assert_eq!(counts, vec![expected, expected]);
        prop_assert_eq!(level0.inner().len(), stored.len() - expected);
        prop_assert_eq!(level1.inner().len(), stored.len() - expected);
    }

    /// Property: numeric comparison clauses parse into the matching operator.
    #[test]
    fn prop_numeric_clause_parses(field in "[a-z]{1,12}", value in -1000i64..1000) {
        let (key, op, parsed) = parse_clause(&format!("{field}>={value}")).unwrap();
        prop_assert_eq!(key, field);
        prop_assert_eq!(op, FilterType::GreaterThanOrEqual);
        prop_assert_eq!(parsed, serde_json::Value::from(value));
    }
}
