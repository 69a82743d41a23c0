// Integration tests for the FerricDB engine core
use ferricdb_core::{
    Database, DurabilityPolicy, EngineConfig, FerricError, FindOptions, Hint, IndexOptions,
    Projection, Value,
};
use serde_json::json;
use tempfile::TempDir;

fn open_db(dir: &TempDir) -> Database {
    Database::open_default(dir.path().join("db")).unwrap()
}

#[test]
fn test_insert_get_roundtrip_with_generated_id() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    let id = users
        .insert(&json!({"name": "Alice", "tags": ["a", "b"], "profile": {"city": "NYC"}}))
        .unwrap();

    let found = users
        .find_one(&json!({"_id": {"$oid": id.to_string()}}))
        .unwrap()
        .expect("inserted document not found");

    // Deep-equal to the input, except for the populated _id.
    assert_eq!(found.get("name"), Some(&Value::String("Alice".into())));
    assert_eq!(
        found.get_path("profile.city"),
        Some(&Value::String("NYC".into()))
    );
    assert_eq!(found.id(), Some(id));
}

#[test]
fn test_find_with_range_filter() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    users.insert(&json!({"name": "A", "age": 20})).unwrap();
    users.insert(&json!({"name": "B", "age": 40})).unwrap();

    let results = users
        .find(&json!({"age": {"$gt": 25}}), FindOptions::new())
        .unwrap()
        .collect_docs()
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get("name"), Some(&Value::String("B".into())));
}

#[test]
fn test_unique_index_rejects_duplicate() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    users
        .create_index(&json!({"email": 1}), IndexOptions::unique())
        .unwrap();

    users.insert(&json!({"email": "x@example.com"})).unwrap();
    let err = users
        .insert(&json!({"email": "x@example.com"}))
        .unwrap_err();
    assert!(matches!(err, FerricError::DuplicateKey { .. }));

    // Only the first document landed.
    assert_eq!(users.count(&json!({})).unwrap(), 1);
}

#[test]
fn test_group_sums_by_category() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let sales = db.collection("sales").unwrap();

    sales.insert(&json!({"category": "x", "amount": 5})).unwrap();
    sales.insert(&json!({"category": "x", "amount": 3})).unwrap();
    sales.insert(&json!({"category": "y", "amount": 2})).unwrap();

    let mut results = sales
        .aggregate(&json!([
            {"$group": {"_id": "$category", "total": {"$sum": "$amount"}}}
        ]))
        .unwrap()
        .collect_json()
        .unwrap();
    results.sort_by_key(|d| d["_id"].as_str().unwrap().to_string());

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["_id"], "x");
    assert_eq!(results[0]["total"], 8);
    assert_eq!(results[1]["_id"], "y");
    assert_eq!(results[1]["total"], 2);
}

#[test]
fn test_unwind_expands_array() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let posts = db.collection("posts").unwrap();

    posts.insert(&json!({"_id": 1, "tags": ["a", "b"]})).unwrap();

    let results = posts
        .aggregate(&json!([{"$unwind": "$tags"}, {"$sort": {"tags": 1}}]))
        .unwrap()
        .collect_json()
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["tags"], "a");
    assert_eq!(results[1]["tags"], "b");
    assert_eq!(results[0]["_id"], 1);
}

#[test]
fn test_idempotent_delete() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    let result = users.delete(&json!({"_id": 12345})).unwrap();
    assert_eq!(result.deleted, 0);
}

#[test]
fn test_update_matched_and_modified_counts() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    users.insert(&json!({"_id": 1, "status": "new"})).unwrap();
    users.insert(&json!({"_id": 2, "status": "new"})).unwrap();
    users.insert(&json!({"_id": 3, "status": "done"})).unwrap();

    let result = users
        .update(
            &json!({"status": "new"}),
            &json!({"$set": {"status": "done"}}),
        )
        .unwrap();
    assert_eq!(result.matched, 2);
    assert_eq!(result.modified, 2);

    // Re-running matches all three but changes nothing.
    let result = users
        .update(
            &json!({"status": "done"}),
            &json!({"$set": {"status": "done"}}),
        )
        .unwrap();
    assert_eq!(result.matched, 3);
    assert_eq!(result.modified, 0);
}

#[test]
fn test_delete_by_filter() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    for i in 0..5 {
        users.insert(&json!({"_id": i, "even": i % 2 == 0})).unwrap();
    }

    let result = users.delete(&json!({"even": true})).unwrap();
    assert_eq!(result.deleted, 3);
    assert_eq!(users.count(&json!({})).unwrap(), 2);
}

#[test]
fn test_projection_and_sort_and_paging() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    for (i, age) in [40, 20, 30, 10, 50].iter().enumerate() {
        users
            .insert(&json!({"_id": i as i64, "age": age, "noise": "x"}))
            .unwrap();
    }

    let opts = FindOptions::new()
        .with_sort(vec![("age".to_string(), 1)])
        .with_skip(1)
        .with_limit(2)
        .with_projection(Projection::from_json(&json!({"age": 1, "_id": 0})).unwrap());

    let results = users
        .find(&json!({}), opts)
        .unwrap()
        .collect_json()
        .unwrap();

    assert_eq!(results, vec![json!({"age": 20}), json!({"age": 30})]);
}

#[test]
fn test_mixed_projection_is_invalid() {
    let err = Projection::from_json(&json!({"a": 1, "b": 0})).unwrap_err();
    assert!(matches!(err, FerricError::InvalidProjection(_)));
}

#[test]
fn test_unknown_query_operator_is_invalid() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    let err = users
        .find(&json!({"age": {"$between": [1, 2]}}), FindOptions::new())
        .unwrap_err();
    assert!(matches!(err, FerricError::InvalidQueryOperator(_)));
}

#[test]
fn test_type_mismatch_comparison_is_no_match_not_error() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    users.insert(&json!({"age": "not a number"})).unwrap();
    let results = users
        .find(&json!({"age": {"$gt": 10}}), FindOptions::new())
        .unwrap()
        .collect_docs()
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_distinct_with_array_fanout() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let posts = db.collection("posts").unwrap();

    posts.insert(&json!({"tags": ["a", "b"]})).unwrap();
    posts.insert(&json!({"tags": ["b", "c"]})).unwrap();

    let values = posts.distinct("tags", &json!({})).unwrap();
    assert_eq!(
        values,
        vec![
            Value::String("a".into()),
            Value::String("b".into()),
            Value::String("c".into()),
        ]
    );
}

#[test]
fn test_aggregate_match_project_pipeline() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let orders = db.collection("orders").unwrap();

    orders
        .insert(&json!({"sku": "a", "price": 10, "qty": 3}))
        .unwrap();
    orders
        .insert(&json!({"sku": "b", "price": 5, "qty": 1}))
        .unwrap();

    let results = orders
        .aggregate(&json!([
            {"$match": {"qty": {"$gte": 2}}},
            {"$project": {"_id": 0, "sku": 1, "total": {"$multiply": ["$price", "$qty"]}}}
        ]))
        .unwrap()
        .collect_json()
        .unwrap();

    assert_eq!(results, vec![json!({"sku": "a", "total": 30})]);
}

#[test]
fn test_malformed_pipeline_fails_before_execution() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let orders = db.collection("orders").unwrap();

    let err = orders
        .aggregate(&json!([{"$match": {}}, {"$bogus": 1}]))
        .unwrap_err();
    assert!(matches!(err, FerricError::InvalidPipelineStage(_)));
}

#[test]
fn test_explain_reports_access_path() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let users = db.collection("users").unwrap();

    users.insert(&json!({"age": 1})).unwrap();
    users
        .create_index(&json!({"age": 1}), IndexOptions::default())
        .unwrap();

    let plan = users
        .explain(&json!({"age": {"$gt": 0}}), &FindOptions::new())
        .unwrap();
    assert_eq!(plan["stage"], "IXSCAN");
    assert_eq!(plan["indexName"], "age_1");

    let plan = users
        .explain(
            &json!({"age": {"$gt": 0}}),
            &FindOptions::new().with_hint(Hint::Natural),
        )
        .unwrap();
    assert_eq!(plan["stage"], "COLLSCAN");
}

#[test]
fn test_document_too_large_rejected() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let blobs = db.collection("blobs").unwrap();

    let big = "x".repeat(17 * 1024 * 1024);
    let err = blobs.insert(&json!({"data": big})).unwrap_err();
    assert!(matches!(err, FerricError::DocumentTooLarge { .. }));
}

#[test]
fn test_batched_durability_survives_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = EngineConfig::new().with_durability(DurabilityPolicy::Batched { every_n: 100 });

    {
        let db = Database::open(&path, config.clone()).unwrap();
        let users = db.collection("users").unwrap();
        for i in 0..10 {
            users.insert(&json!({"_id": i})).unwrap();
        }
        // Checkpoint makes everything durable regardless of batching.
        db.checkpoint().unwrap();
    }

    let db = Database::open(&path, config).unwrap();
    let users = db.collection("users").unwrap();
    assert_eq!(users.count(&json!({})).unwrap(), 10);
}

#[test]
fn test_crash_recovery_replays_wal_tail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open_default(&path).unwrap();
        let users = db.collection("users").unwrap();
        users.insert(&json!({"_id": 1, "name": "A"})).unwrap();
        db.checkpoint().unwrap();
        // These live only in the WAL when the process "crashes".
        users.insert(&json!({"_id": 2, "name": "B"})).unwrap();
        users
            .update(&json!({"_id": 1}), &json!({"$set": {"name": "A2"}}))
            .unwrap();
        users.delete(&json!({"_id": 2})).unwrap();
        // No checkpoint: drop simulates the crash.
    }

    let db = Database::open_default(&path).unwrap();
    let users = db.collection("users").unwrap();
    assert_eq!(users.count(&json!({})).unwrap(), 1);
    let doc = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc.get("name"), Some(&Value::String("A2".into())));
}

#[test]
fn test_extended_json_types_roundtrip_through_storage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open_default(&path).unwrap();
        let events = db.collection("events").unwrap();
        events
            .insert(&json!({
                "_id": 1,
                "at": {"$date": 1700000000000i64},
                "amount": {"$numberDecimal": "10.50"},
                "payload": {"$binary": "deadbeef"}
            }))
            .unwrap();
        db.checkpoint().unwrap();
    }

    let db = Database::open_default(&path).unwrap();
    let events = db.collection("events").unwrap();
    let doc = events.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc.get("at"), Some(&Value::DateTime(1700000000000)));
    assert_eq!(
        doc.get("amount"),
        Some(&Value::Decimal128(
            ferricdb_core::Decimal128::parse("10.5").unwrap()
        ))
    );
}

#[test]
fn test_decimal_filters_compare_numerically() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let prices = db.collection("prices").unwrap();

    prices
        .insert(&json!({"p": {"$numberDecimal": "10.50"}}))
        .unwrap();
    prices.insert(&json!({"p": 3})).unwrap();

    let results = prices
        .find(&json!({"p": {"$gt": 5}}), FindOptions::new())
        .unwrap()
        .collect_docs()
        .unwrap();
    assert_eq!(results.len(), 1);
}
