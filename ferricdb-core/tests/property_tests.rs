// Property-based tests over the engine core
use ferricdb_core::{Database, Document, FindOptions, Hint, IndexOptions};
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn sorted_ids(docs: &[Document]) -> Vec<String> {
    let mut ids: Vec<String> = docs
        .iter()
        .map(|d| serde_json::to_string(&d.to_json()["_id"]).unwrap())
        .collect();
    ids.sort();
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Index scans and forced collection scans agree on every range filter.
    #[test]
    fn prop_index_scan_equivalence(
        ages in prop::collection::vec(0i64..100, 1..60),
        lo in 0i64..100,
        width in 0i64..50,
    ) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_default(dir.path().join("db")).unwrap();
        let users = db.collection("users").unwrap();

        for (i, age) in ages.iter().enumerate() {
            users.insert(&json!({"_id": i as i64, "age": age})).unwrap();
        }
        users.create_index(&json!({"age": 1}), IndexOptions::default()).unwrap();

        let filter = json!({"age": {"$gte": lo, "$lt": lo + width}});
        let via_index = users
            .find(&filter, FindOptions::new())
            .unwrap()
            .collect_docs()
            .unwrap();
        let via_scan = users
            .find(&filter, FindOptions::new().with_hint(Hint::Natural))
            .unwrap()
            .collect_docs()
            .unwrap();

        prop_assert_eq!(sorted_ids(&via_index), sorted_ids(&via_scan));

        // And both agree with a direct count of the source data.
        let expected = ages.iter().filter(|a| **a >= lo && **a < lo + width).count();
        prop_assert_eq!(via_index.len(), expected);
    }

    /// Insert then fetch by _id returns the same document.
    #[test]
    fn prop_insert_roundtrip(
        names in prop::collection::vec("[a-z]{1,12}", 1..20),
    ) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_default(dir.path().join("db")).unwrap();
        let users = db.collection("users").unwrap();

        for (i, name) in names.iter().enumerate() {
            let doc = json!({"_id": i as i64, "name": name, "pos": i});
            users.insert(&doc).unwrap();

            let found = users
                .find_one(&json!({"_id": i as i64}))
                .unwrap()
                .expect("inserted doc must be findable");
            prop_assert_eq!(found.to_json(), doc);
        }
    }

    /// A sorted find is a permutation of the unsorted result in the
    /// requested order.
    #[test]
    fn prop_sort_orders_results(
        ages in prop::collection::vec(-50i64..50, 1..40),
    ) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_default(dir.path().join("db")).unwrap();
        let users = db.collection("users").unwrap();

        for (i, age) in ages.iter().enumerate() {
            users.insert(&json!({"_id": i as i64, "age": age})).unwrap();
        }

        let docs = users
            .find(&json!({}), FindOptions::new().with_sort(vec![("age".to_string(), 1)]))
            .unwrap()
            .collect_docs()
            .unwrap();

        let got: Vec<i64> = docs
            .iter()
            .map(|d| d.get("age").and_then(ferricdb_core::Value::as_i64).unwrap())
            .collect();
        let mut expected = ages.clone();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    /// Commit/abort leaves the document count exactly right.
    #[test]
    fn prop_transaction_atomicity(
        committed in prop::collection::vec(0i64..1000, 0..20),
        aborted in prop::collection::vec(1000i64..2000, 0..20),
    ) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_default(dir.path().join("db")).unwrap();
        let users = db.collection("users").unwrap();
        let txns = db.transactions();

        let mut committed = committed;
        committed.sort();
        committed.dedup();
        let mut aborted = aborted;
        aborted.sort();
        aborted.dedup();

        let mut tx = txns.begin();
        for id in &committed {
            users.insert_with(&mut tx, &json!({"_id": id})).unwrap();
        }
        txns.commit(&mut tx).unwrap();

        let mut tx = txns.begin();
        for id in &aborted {
            users.insert_with(&mut tx, &json!({"_id": id})).unwrap();
        }
        txns.abort(&mut tx);

        prop_assert_eq!(users.count(&json!({})).unwrap(), committed.len() as u64);
        for id in &aborted {
            let is_none = users.find_one(&json!({"_id": id})).unwrap().is_none();
            prop_assert!(is_none);
        }
    }

    /// Whatever was committed before a "crash" is there after reopen;
    /// GC and checkpoints never change query results.
    #[test]
    fn prop_recovery_preserves_committed(
        ids in prop::collection::vec(0i64..500, 1..30),
        checkpoint in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let mut ids = ids;
        ids.sort();
        ids.dedup();

        {
            let db = Database::open_default(&path).unwrap();
            let users = db.collection("users").unwrap();
            for id in &ids {
                users.insert(&json!({"_id": id})).unwrap();
            }
            if checkpoint {
                db.checkpoint().unwrap();
            }
            // Drop without checkpoint simulates a crash; the WAL carries
            // the tail.
        }

        let db = Database::open_default(&path).unwrap();
        let users = db.collection("users").unwrap();
        prop_assert_eq!(users.count(&json!({})).unwrap(), ids.len() as u64);
    }
}
