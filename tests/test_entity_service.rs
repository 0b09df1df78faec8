//! Entity service behaviour over the in-memory adapter.

use async_trait::async_trait;
use entity_store::{
    BroadcastInvalidator, CacheInvalidator, Context, Entity, EntityError, EntityHooks, EntityService,
    MemoryAdapter, PopulateRule, SchemaValidator, ServiceBroker, ServiceConfig, StorageAdapter,
};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn params(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().cloned().expect("params must be an object")
}

async fn connected_adapter() -> Arc<MemoryAdapter> {
    let adapter = Arc::new(MemoryAdapter::new("id"));
    adapter.connect().await.unwrap();
    adapter
}

async fn posts_service(config: ServiceConfig) -> EntityService {
    EntityService::new(config, connected_adapter().await)
}

async fn seed_votes(service: &EntityService) {
    let ctx = Context::new();
    for (id, votes) in [("p1", 2), ("p2", 5), ("p3", 0)] {
        service
            .call("create", &params(json!({ "entity": { "id": id, "votes": votes } })), &ctx)
            .await
            .unwrap();
    }
}

#[derive(Default)]
struct RecordingCache {
    patterns: Mutex<Vec<String>>,
}

impl CacheInvalidator for RecordingCache {
    fn publish(&self, pattern: &str) {
        self.patterns.lock().unwrap().push(pattern.to_string());
    }
}

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<(&'static str, JsonValue)>>,
    fail: bool,
}

impl RecordingHooks {
    fn record(&self, name: &'static str, doc: &JsonValue) -> anyhow::Result<()> {
        self.events.lock().unwrap().push((name, doc.clone()));
        if self.fail {
            anyhow::bail!("{} hook exploded", name);
        }
        Ok(())
    }
}

#[async_trait]
impl EntityHooks for RecordingHooks {
    async fn entity_created(&self, doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        self.record("created", doc)
    }

    async fn entity_updated(&self, doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        self.record("updated", doc)
    }

    async fn entity_removed(&self, doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        self.record("removed", doc)
    }
}

#[tokio::test]
async fn find_sorts_descending() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    seed_votes(&service).await;

    let found = service
        .call("find", &params(json!({ "sort": "-votes" })), &Context::new())
        .await
        .unwrap();
    let votes: Vec<_> = found.as_array().unwrap().iter().map(|d| d["votes"].clone()).collect();
    assert_eq!(votes, vec![json!(5), json!(2), json!(0)]);
}

#[tokio::test]
async fn list_reports_page_metadata() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    seed_votes(&service).await;

    let page = service
        .call("list", &params(json!({ "pageSize": 2, "sort": "-votes" })), &Context::new())
        .await
        .unwrap();

    assert_eq!(page["total"], json!(3));
    assert_eq!(page["page"], json!(1));
    assert_eq!(page["pageSize"], json!(2));
    assert_eq!(page["totalPages"], json!(2));
    let ids: Vec<_> = page["rows"].as_array().unwrap().iter().map(|d| d["id"].clone()).collect();
    assert_eq!(ids, vec![json!("p2"), json!("p1")]);

    let last = service
        .call("list", &params(json!({ "page": "2", "pageSize": "2", "sort": "-votes" })), &Context::new())
        .await
        .unwrap();
    assert_eq!(last["rows"].as_array().unwrap().len(), 1);
    assert_eq!(last["total"], json!(3));
}

#[tokio::test]
async fn list_of_empty_collection_has_no_pages() {
    let service = posts_service(ServiceConfig::new("posts")).await;

    let page = service
        .call("list", &params(json!({ "pageSize": 5 })), &Context::new())
        .await
        .unwrap();

    assert_eq!(page["rows"], json!([]));
    assert_eq!(page["total"], json!(0));
    assert_eq!(page["totalPages"], json!(0));
    assert_eq!(page["page"], json!(1));
    assert_eq!(page["pageSize"], json!(5));
}

#[tokio::test]
async fn count_ignores_limit_and_offset() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    seed_votes(&service).await;
    let ctx = Context::new();

    let all = service.call("count", &Map::new(), &ctx).await.unwrap();
    let paged = service
        .call("count", &params(json!({ "limit": 1, "offset": 2 })), &ctx)
        .await
        .unwrap();
    assert_eq!(all, json!(3));
    assert_eq!(paged, all);
}

#[tokio::test]
async fn get_with_mapping_keys_existing_entities_by_id() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    let ctx = Context::new();
    for id in ["A", "C"] {
        service
            .call("create", &params(json!({ "entity": { "id": id, "title": format!("post {id}") } })), &ctx)
            .await
            .unwrap();
    }

    let mapped = service
        .call("get", &params(json!({ "id": ["A", "B", "C"], "mapping": true, "fields": ["title"] })), &ctx)
        .await
        .unwrap();
    assert_eq!(mapped, json!({ "A": { "title": "post A" }, "C": { "title": "post C" } }));

    let listed = service
        .call("get", &params(json!({ "id": ["C", "B"] })), &ctx)
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let err = service
        .call("get", &params(json!({ "id": "B" })), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn allowed_fields_shape_every_response() {
    let service = posts_service(ServiceConfig::new("posts").fields(["id", "title"])).await;
    let ctx = Context::new();

    let created = service
        .call("create", &params(json!({ "entity": { "id": "p1", "title": "Hi", "secret": "x" } })), &ctx)
        .await
        .unwrap();
    assert_eq!(created, json!({ "id": "p1", "title": "Hi" }));

    let only_title = service
        .call("find", &params(json!({ "fields": "title secret" })), &ctx)
        .await
        .unwrap();
    assert_eq!(only_title, json!([{ "title": "Hi" }]));

    // The stored document is untouched by projection.
    let stored = service.adapter().find_by_id(&json!("p1")).await.unwrap();
    assert_eq!(stored["secret"], json!("x"));
}

#[tokio::test]
async fn mutations_publish_cache_pattern_and_run_hooks() {
    let cache = Arc::new(RecordingCache::default());
    let hooks = Arc::new(RecordingHooks::default());
    let service = posts_service(ServiceConfig::new("posts"))
        .await
        .with_cache(cache.clone())
        .with_hooks(hooks.clone());
    let ctx = Context::new();

    service
        .call("create", &params(json!({ "entity": { "id": "p1", "votes": 1 } })), &ctx)
        .await
        .unwrap();
    service
        .call("update", &params(json!({ "id": "p1", "patch": { "$inc": { "votes": 1 } } })), &ctx)
        .await
        .unwrap();
    let removed = service
        .call("remove", &params(json!({ "id": "p1" })), &ctx)
        .await
        .unwrap();
    assert_eq!(removed, json!({ "id": "p1", "votes": 2 }));

    assert_eq!(*cache.patterns.lock().unwrap(), vec!["posts.*"; 3]);
    let events = hooks.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            ("created", json!({ "id": "p1", "votes": 1 })),
            ("updated", json!({ "id": "p1", "votes": 2 })),
            ("removed", json!({ "id": "p1", "votes": 2 })),
        ]
    );
}

#[tokio::test]
async fn broadcast_subscribers_receive_invalidations() {
    let cache = Arc::new(BroadcastInvalidator::default());
    let mut rx = cache.subscribe();
    let service = posts_service(ServiceConfig::new("posts")).await.with_cache(cache);

    service
        .call("insert", &params(json!({ "entities": [{ "id": 1 }, { "id": 2 }] })), &Context::new())
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), "posts.*");
}

#[tokio::test]
async fn failing_hook_does_not_fail_the_mutation() {
    let hooks = Arc::new(RecordingHooks { fail: true, ..Default::default() });
    let service = posts_service(ServiceConfig::new("posts")).await.with_hooks(hooks.clone());

    let created = service
        .call("create", &params(json!({ "entity": { "id": "p1" } })), &Context::new())
        .await
        .unwrap();
    assert_eq!(created, json!({ "id": "p1" }));
    assert_eq!(hooks.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn validator_rejects_before_anything_is_stored() {
    let schema: BTreeMap<String, String> =
        [("title".to_string(), "string".to_string()), ("votes".to_string(), "number?".to_string())]
            .into_iter()
            .collect();
    let config = ServiceConfig::new("posts").validator(SchemaValidator::from_schema(&schema).unwrap());
    let service = posts_service(config).await;
    let ctx = Context::new();

    let err = service
        .call("create", &params(json!({ "entity": { "votes": 1 } })), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }), "got {err:?}");

    let err = service
        .call(
            "insert",
            &params(json!({ "entities": [{ "title": "ok" }, { "title": 7 }] })),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }), "got {err:?}");
    assert_eq!(service.call("count", &Map::new(), &ctx).await.unwrap(), json!(0));
}

#[tokio::test]
async fn bad_requests_are_reported_as_such() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    let ctx = Context::new();

    let err = service.call("explode", &Map::new(), &ctx).await.unwrap_err();
    assert!(matches!(err, EntityError::UnknownAction { .. }), "got {err:?}");

    let err = service.call("create", &Map::new(), &ctx).await.unwrap_err();
    assert!(matches!(err, EntityError::InvalidParam { .. }), "got {err:?}");

    let err = service
        .call("list", &params(json!({ "pageSize": "many" })), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::InvalidParam { .. }), "got {err:?}");
}

#[tokio::test]
async fn bulk_operations_return_counts() {
    let service = posts_service(ServiceConfig::new("posts")).await;
    seed_votes(&service).await;
    let ctx = Context::new();

    let updated = service
        .update_many(&ctx, &json!({ "votes": { "$gt": 0 } }), &json!({ "$set": { "hot": true } }))
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(service.remove_many(&ctx, &json!({ "hot": true })).await.unwrap(), 2);
    assert_eq!(service.clear(&ctx).await.unwrap(), 1);
}

/// Adapter whose reads take longer than any sane deadline.
struct SlowAdapter(MemoryAdapter);

#[async_trait]
impl StorageAdapter for SlowAdapter {
    async fn find(&self, params: &entity_store::QueryParams) -> entity_store::EntityResult<Vec<Entity>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.0.find(params).await
    }
    async fn count(&self, params: &entity_store::QueryParams) -> entity_store::EntityResult<u64> {
        self.0.count(params).await
    }
    async fn find_by_id(&self, id: &JsonValue) -> entity_store::EntityResult<Entity> {
        self.0.find_by_id(id).await
    }
    async fn find_by_ids(&self, ids: &[JsonValue]) -> entity_store::EntityResult<Vec<Entity>> {
        self.0.find_by_ids(ids).await
    }
    async fn insert(&self, entity: Entity) -> entity_store::EntityResult<Entity> {
        self.0.insert(entity).await
    }
    async fn insert_many(&self, entities: Vec<Entity>) -> entity_store::EntityResult<Vec<Entity>> {
        self.0.insert_many(entities).await
    }
    async fn update_by_id(&self, id: &JsonValue, patch: &JsonValue) -> entity_store::EntityResult<Entity> {
        self.0.update_by_id(id, patch).await
    }
    async fn update_many(&self, query: &JsonValue, patch: &JsonValue) -> entity_store::EntityResult<u64> {
        self.0.update_many(query, patch).await
    }
    async fn remove_by_id(&self, id: &JsonValue) -> entity_store::EntityResult<u64> {
        self.0.remove_by_id(id).await
    }
    async fn remove_many(&self, query: &JsonValue) -> entity_store::EntityResult<u64> {
        self.0.remove_many(query).await
    }
    async fn clear(&self) -> entity_store::EntityResult<u64> {
        self.0.clear().await
    }
}

#[tokio::test]
async fn expired_deadline_aborts_the_call() {
    let inner = MemoryAdapter::new("id");
    inner.connect().await.unwrap();
    let service = EntityService::new(ServiceConfig::new("posts"), Arc::new(SlowAdapter(inner)));

    let err = service
        .call("find", &Map::new(), &Context::with_timeout(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deadline exceeded"), "got {err}");
}

#[tokio::test]
async fn population_resolves_through_the_broker() {
    let broker = ServiceBroker::new();
    let ctx = Context::new();

    let users = broker
        .register(
            EntityService::new(
                ServiceConfig::new("users").fields(["id", "name"]),
                connected_adapter().await,
            )
            .with_invoker(broker.invoker()),
        )
        .await;
    let posts = broker
        .register(
            EntityService::new(
                ServiceConfig::new("posts").populate("author", PopulateRule::remote("users.get")),
                connected_adapter().await,
            )
            .with_invoker(broker.invoker()),
        )
        .await;

    users
        .call("create", &params(json!({ "entity": { "id": "u1", "name": "Ann", "email": "ann@example.com" } })), &ctx)
        .await
        .unwrap();
    posts
        .call("create", &params(json!({ "entity": { "id": "p1", "author": "u1" } })), &ctx)
        .await
        .unwrap();
    posts
        .call("create", &params(json!({ "entity": { "id": "p2", "author": "ghost" } })), &ctx)
        .await
        .unwrap();

    let found = broker
        .call("posts", "find", &params(json!({ "populate": ["author"] })), &ctx)
        .await
        .unwrap();
    assert_eq!(
        found,
        json!([
            { "id": "p1", "author": { "id": "u1", "name": "Ann" } },
            { "id": "p2", "author": null }
        ])
    );

    // Without `populate` the reference stays as stored.
    let plain = posts.call("get", &params(json!({ "id": "p1" })), &ctx).await.unwrap();
    assert_eq!(plain, json!({ "id": "p1", "author": "u1" }));

    let err = broker.call("comments", "find", &Map::new(), &ctx).await.unwrap_err();
    assert!(matches!(err, EntityError::UnknownAction { .. }), "got {err:?}");
}
