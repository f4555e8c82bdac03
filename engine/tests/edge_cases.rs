//! Edge case tests for hearth-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use hearth_engine::{
    CollectionSchema, Direction, Document, DocumentStore, Error, Migration, Operator, Query,
    Schema, UpdateOptions,
};
use serde_json::{json, Value};

fn create_test_schema() -> Schema {
    Schema::new().with_version(
        Migration::new(1).with_collection(CollectionSchema::new("items", ["name", "count", "data"])),
    )
}

async fn create_test_store() -> DocumentStore {
    DocumentStore::builder("edge")
        .schema(create_test_schema())
        .open()
        .await
        .unwrap()
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[tokio::test]
async fn empty_string_fields() {
    let store = create_test_store().await;
    let doc = store.create("items", json!({"name": ""})).await.unwrap();

    let found = store
        .collection("items")
        .eq("name", "")
        .get_by_id(&doc.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&json!("")));
}

#[tokio::test]
async fn unicode_strings() {
    let store = create_test_store().await;

    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Ω≈ç√∫",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for name in names {
        let doc = store.create("items", json!({"name": name})).await.unwrap();
        let found = store.collection("items").eq("name", name).first().await.unwrap();
        assert_eq!(found.map(|d| d.id), Some(doc.id), "Failed for: {name}");
    }
}

#[tokio::test]
async fn quotes_in_filter_values_are_plain_data() {
    let store = create_test_store().await;
    store.create("items", json!({"name": "O'Brien"})).await.unwrap();
    store.create("items", json!({"name": "\" || true || \""})).await.unwrap();

    let hits = store.collection("items").eq("name", "O'Brien").count().await.unwrap();
    assert_eq!(hits, 1);

    let injected = store
        .collection("items")
        .eq("name", "' || 1 == 1 || '")
        .count()
        .await
        .unwrap();
    assert_eq!(injected, 0);
}

#[tokio::test]
async fn very_long_strings() {
    let store = create_test_store().await;
    let long = "x".repeat(1024 * 1024);

    let doc = store.create("items", json!({"name": long})).await.unwrap();
    let found = store.find(&doc.id).await.unwrap().unwrap();
    assert_eq!(found.get("name").and_then(Value::as_str).map(str::len), Some(long.len()));
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[tokio::test]
async fn integer_boundaries() {
    let store = create_test_store().await;
    for count in [i64::MIN, -1, 0, 1, i64::MAX] {
        store.create("items", json!({"count": count})).await.unwrap();
    }

    let result = store
        .collection("items")
        .order_by("count", Direction::Desc)
        .get()
        .await
        .unwrap();
    let counts: Vec<_> = result
        .into_docs()
        .iter()
        .map(|d| d.field("count").as_i64().unwrap())
        .collect();
    // 0 is falsy and sorts last when descending.
    assert_eq!(counts, vec![i64::MAX, 1, -1, i64::MIN, 0]);

    let negative = store
        .collection("items")
        .filter("count", Operator::Lt, 0)
        .count()
        .await
        .unwrap();
    assert_eq!(negative, 2);
}

#[tokio::test]
async fn integers_and_floats_compare_numerically() {
    let store = create_test_store().await;
    store.create("items", json!({"count": 2})).await.unwrap();
    store.create("items", json!({"count": 2.5})).await.unwrap();

    let hits = store
        .collection("items")
        .filter("count", Operator::Eq, 2.0)
        .count()
        .await
        .unwrap();
    assert_eq!(hits, 1);

    let above = store
        .collection("items")
        .filter("count", Operator::Gt, 2)
        .count()
        .await
        .unwrap();
    assert_eq!(above, 1);
}

// ============================================================================
// JSON Edge Cases
// ============================================================================

#[tokio::test]
async fn deeply_nested_json() {
    let store = create_test_store().await;

    let mut nested = json!({"value": "deep"});
    for i in 0..50 {
        nested = json!({ format!("level_{i}"): nested });
    }

    let doc = store.create("items", json!({"data": nested.clone()})).await.unwrap();
    let found = store.find(&doc.id).await.unwrap().unwrap();
    assert_eq!(found.get("data"), Some(&nested));
}

#[tokio::test]
async fn arrays_and_objects_never_match_equality() {
    let store = create_test_store().await;
    store
        .create("items", json!({"data": {"a": 1}, "tags": ["x"]}))
        .await
        .unwrap();

    let by_object = store
        .collection("items")
        .eq("data", json!({"a": 1}))
        .count()
        .await
        .unwrap();
    let by_array = store
        .collection("items")
        .eq("tags", json!(["x"]))
        .count()
        .await
        .unwrap();

    assert_eq!(by_object, 0);
    assert_eq!(by_array, 0);
}

#[tokio::test]
async fn reserved_fields_in_payload_are_ignored() {
    let store = create_test_store().await;
    let doc = store
        .create(
            "items",
            json!({"_id": "mine", "_synced": true, "_purged": 1, "name": "x"}),
        )
        .await
        .unwrap();

    assert_ne!(doc.id, "mine");
    assert!(!doc.synced);
    assert!(!doc.purged);
}

#[tokio::test]
async fn non_object_payloads_are_rejected() {
    let store = create_test_store().await;

    for payload in [json!(null), json!(1), json!("text"), json!([{"name": "x"}])] {
        let err = store.create("items", payload).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    assert!(store.get_all().await.unwrap().is_empty());
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[tokio::test]
async fn offset_past_end_keeps_total() {
    let store = create_test_store().await;
    for i in 0..3 {
        store.create("items", json!({"count": i})).await.unwrap();
    }

    let result = store.collection("items").offset(10).limit(5).get().await.unwrap();
    assert_eq!(result.total, 3);
    assert!(result.docs.is_empty());

    let zero = store.collection("items").limit(0).get().await.unwrap();
    assert_eq!(zero.total, 3);
    assert!(zero.docs.is_empty());
}

#[tokio::test]
async fn unknown_collection_is_empty() {
    let store = create_test_store().await;

    assert_eq!(store.collection("nothing").count().await.unwrap(), 0);
    assert!(store.collection("nothing").first().await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_operator_is_rejected() {
    let store = create_test_store().await;
    let err = store.collection("items").filter_op("name", "LIKE", "x").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn query_is_a_value() {
    let base = Query::new("items").eq("name", "a");
    let sorted = base.clone().order_by("count", Direction::Asc);

    assert!(base.orders.is_empty());
    assert_eq!(sorted.orders.len(), 1);
    assert_eq!(base.filters, sorted.filters);
}

// ============================================================================
// ID Edge Cases
// ============================================================================

#[tokio::test]
async fn ids_with_special_characters() {
    let store = create_test_store().await;

    let ids = [
        "simple",
        "with-dash",
        "with_underscore",
        "with.dot",
        "with:colon",
        "with/slash",
        "with spaces",
        "日本語",
    ];

    for id in ids {
        let doc = Document::new(id, "items", Default::default(), 1000);
        store.store(doc).await.unwrap();

        let found = store.collection("items").get_by_id(id).await.unwrap();
        assert!(found.is_some(), "Failed for ID: {id}");
    }
}

#[tokio::test]
async fn many_documents_get_unique_ids() {
    let store = create_test_store().await;

    let mut ids = std::collections::HashSet::new();
    for i in 0..500 {
        let doc = store.create("items", json!({"count": i})).await.unwrap();
        assert!(ids.insert(doc.id));
    }
}

#[tokio::test]
async fn silent_update_keeps_timestamps() {
    let store = create_test_store().await;
    let doc = store.create("items", json!({"name": "a"})).await.unwrap();

    let mut copy = doc.clone();
    copy.updated_at = 1;
    let saved = store.update(copy, UpdateOptions::silent()).await.unwrap();
    assert_eq!(saved.updated_at, 1);
}
