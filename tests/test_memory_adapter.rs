//! Storage contract, exercised against the in-memory adapter.

use entity_store::storage::GENERATED_ID_LEN;
use entity_store::{Entity, EntityError, MemoryAdapter, QueryParams, StorageAdapter};
use serde_json::{json, Value as JsonValue};

fn doc(value: JsonValue) -> Entity {
    value.as_object().cloned().expect("document must be an object")
}

fn field<'a>(docs: &'a [Entity], name: &str) -> Vec<&'a JsonValue> {
    docs.iter().map(|d| &d[name]).collect()
}

async fn seeded() -> MemoryAdapter {
    let adapter = MemoryAdapter::new("id");
    adapter.connect().await.unwrap();
    adapter
        .insert_many(vec![
            doc(json!({ "id": "a", "title": "Rust in action", "votes": 2, "tags": ["lang"] })),
            doc(json!({ "id": "b", "title": "Go basics", "votes": 5 })),
            doc(json!({ "id": "c", "title": "rust macros", "votes": 0, "draft": true })),
        ])
        .await
        .unwrap();
    adapter
}

#[tokio::test]
async fn operations_fail_while_disconnected() {
    let adapter = MemoryAdapter::new("id");
    let err = adapter.find(&QueryParams::default()).await.unwrap_err();
    assert!(matches!(err, EntityError::Adapter { .. }), "got {err:?}");

    adapter.connect().await.unwrap();
    adapter.insert(doc(json!({ "id": 1 }))).await.unwrap();
    adapter.disconnect().await.unwrap();
    assert!(adapter.count(&QueryParams::default()).await.is_err());

    // Data survives a reconnect.
    adapter.connect().await.unwrap();
    assert_eq!(adapter.count(&QueryParams::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn insert_assigns_a_generated_id() {
    let adapter = MemoryAdapter::new("id");
    adapter.connect().await.unwrap();

    let stored = adapter.insert(doc(json!({ "title": "untitled" }))).await.unwrap();
    let id = stored["id"].as_str().expect("generated id is a string");
    assert_eq!(id.len(), GENERATED_ID_LEN);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

    let fetched = adapter.find_by_id(&json!(id)).await.unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn duplicate_primary_key_is_rejected_atomically() {
    let adapter = seeded().await;

    let err = adapter.insert(doc(json!({ "id": "a" }))).await.unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }), "got {err:?}");

    let err = adapter
        .insert_many(vec![doc(json!({ "id": "x" })), doc(json!({ "id": "x" }))])
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }), "got {err:?}");
    assert_eq!(adapter.count(&QueryParams::default()).await.unwrap(), 3);
}

#[tokio::test]
async fn find_sorts_then_pages() {
    let adapter = seeded().await;

    let params = QueryParams { sort: vec!["-votes".into()], ..Default::default() };
    let docs = adapter.find(&params).await.unwrap();
    assert_eq!(field(&docs, "votes"), vec![&json!(5), &json!(2), &json!(0)]);

    let params = QueryParams { sort: vec!["votes".into()], offset: Some(1), limit: Some(1), ..Default::default() };
    let docs = adapter.find(&params).await.unwrap();
    assert_eq!(field(&docs, "id"), vec![&json!("a")]);
}

#[tokio::test]
async fn search_overrides_sort() {
    let adapter = seeded().await;

    let params = QueryParams {
        search: Some("RUST".into()),
        search_fields: vec!["title".into()],
        sort: vec!["title".into()],
        ..Default::default()
    };
    let docs = adapter.find(&params).await.unwrap();
    // Insertion order, not alphabetical.
    assert_eq!(field(&docs, "id"), vec![&json!("a"), &json!("c")]);
}

#[tokio::test]
async fn count_ignores_paging() {
    let adapter = seeded().await;

    let paged = QueryParams { limit: Some(1), offset: Some(1), ..Default::default() };
    assert_eq!(adapter.count(&paged).await.unwrap(), 3);

    let filtered = QueryParams { query: Some(json!({ "votes": { "$gte": 2 } })), limit: Some(1), ..Default::default() };
    assert_eq!(adapter.count(&filtered).await.unwrap(), 2);
}

#[tokio::test]
async fn query_operators_filter_documents() {
    let adapter = seeded().await;

    let find = |query: JsonValue| {
        let adapter = &adapter;
        async move {
            let params = QueryParams { query: Some(query), ..Default::default() };
            let docs = adapter.find(&params).await.unwrap();
            docs.iter().map(|d| d["id"].clone()).collect::<Vec<_>>()
        }
    };

    assert_eq!(find(json!({ "votes": 5 })).await, vec![json!("b")]);
    assert_eq!(find(json!({ "votes": { "$lt": 5 } })).await, vec![json!("a"), json!("c")]);
    assert_eq!(find(json!({ "id": { "$in": ["c", "b"] } })).await, vec![json!("b"), json!("c")]);
    assert_eq!(find(json!({ "draft": { "$exists": false } })).await, vec![json!("a"), json!("b")]);

    let params = QueryParams { query: Some(json!({ "votes": { "$near": 1 } })), ..Default::default() };
    let err = adapter.find(&params).await.unwrap_err();
    assert!(matches!(err, EntityError::InvalidParam { .. }), "got {err:?}");
}

#[tokio::test]
async fn find_by_ids_omits_missing_ids() {
    let adapter = seeded().await;

    let docs = adapter
        .find_by_ids(&[json!("c"), json!("missing"), json!("a")])
        .await
        .unwrap();
    assert_eq!(field(&docs, "id"), vec![&json!("a"), &json!("c")]);

    let err = adapter.find_by_id(&json!("missing")).await.unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn update_applies_patch_operators() {
    let adapter = seeded().await;

    let updated = adapter
        .update_by_id(&json!("a"), &json!({ "$inc": { "votes": 3 }, "$set": { "title": "Rust 2" } }))
        .await
        .unwrap();
    assert_eq!(updated["votes"], json!(5));
    assert_eq!(updated["title"], json!("Rust 2"));
    assert_eq!(adapter.find_by_id(&json!("a")).await.unwrap(), updated);

    let err = adapter.update_by_id(&json!("nope"), &json!({ "votes": 1 })).await.unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }), "got {err:?}");

    let err = adapter.update_by_id(&json!("a"), &json!({ "id": "z" })).await.unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }), "got {err:?}");
}

#[tokio::test]
async fn bulk_mutations_report_counts() {
    let adapter = seeded().await;

    let updated = adapter
        .update_many(&json!({ "votes": { "$lte": 2 } }), &json!({ "$set": { "archived": true } }))
        .await
        .unwrap();
    assert_eq!(updated, 2);

    assert_eq!(adapter.remove_many(&json!({ "archived": true })).await.unwrap(), 2);
    assert_eq!(adapter.remove_by_id(&json!("a")).await.unwrap(), 0);
    assert_eq!(adapter.remove_by_id(&json!("b")).await.unwrap(), 1);

    adapter.insert(doc(json!({ "id": "d" }))).await.unwrap();
    assert_eq!(adapter.clear().await.unwrap(), 1);
    assert_eq!(adapter.count(&QueryParams::default()).await.unwrap(), 0);
}
