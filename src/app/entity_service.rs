//! The entity service.
//!
//! Composes the parameter sanitizer, a storage adapter, the populator and the
//! projector into the standard actions (`find`, `count`, `list`, `create`,
//! `insert`, `get`, `update`, `remove`). Every mutation publishes the
//! service's cache pattern and then notifies the lifecycle hooks.

use crate::app::events::{BroadcastInvalidator, CacheInvalidator, ChangeKind, Context, EntityHooks};
use crate::domain::model::ServiceConfig;
use crate::domain::params::{sanitize, QueryParams};
use crate::domain::path::id_key;
use crate::domain::populate::Populator;
use crate::domain::projection::Projection;
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use crate::infra::invoker::RemoteInvoker;
use crate::storage::StorageAdapter;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// The standard actions exposed by every entity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Find,
    Count,
    List,
    Create,
    Insert,
    Get,
    Update,
    Remove,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Find,
        Action::Count,
        Action::List,
        Action::Create,
        Action::Insert,
        Action::Get,
        Action::Update,
        Action::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Count => "count",
            Self::List => "list",
            Self::Create => "create",
            Self::Insert => "insert",
            Self::Get => "get",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for Action {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| EntityError::UnknownAction { action: s.to_string() })
    }
}

/// One page of a `list` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub rows: Vec<Entity>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

/// Result of a `get`: one entity, a list, or an id-keyed mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Entity),
    Many(Vec<Entity>),
    Mapped(Map<String, JsonValue>),
}

impl Fetched {
    pub fn into_value(self) -> JsonValue {
        match self {
            Self::One(doc) => JsonValue::Object(doc),
            Self::Many(docs) => JsonValue::Array(docs.into_iter().map(JsonValue::Object).collect()),
            Self::Mapped(map) => JsonValue::Object(map),
        }
    }
}

pub struct EntityService {
    config: ServiceConfig,
    adapter: Arc<dyn StorageAdapter>,
    populator: Populator,
    cache: Arc<dyn CacheInvalidator>,
    hooks: Option<Arc<dyn EntityHooks>>,
}

impl EntityService {
    pub fn new(config: ServiceConfig, adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            config,
            adapter,
            populator: Populator::default(),
            cache: Arc::new(BroadcastInvalidator::default()),
            hooks: None,
        }
    }

    /// Invoker used by remote populate rules.
    pub fn with_invoker(mut self, invoker: Arc<dyn RemoteInvoker>) -> Self {
        self.populator = Populator::new(Some(invoker));
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn adapter(&self) -> Arc<dyn StorageAdapter> {
        self.adapter.clone()
    }

    /// Dispatches a named action with raw, unsanitized params.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name(), action = %action))]
    pub async fn call(
        &self,
        action: &str,
        raw: &Map<String, JsonValue>,
        ctx: &Context,
    ) -> EntityResult<JsonValue> {
        let action: Action = action.parse()?;
        let settings = self.config.pagination_settings();

        match action {
            Action::Find => {
                let params = sanitize(false, settings, raw)?;
                let docs = self.find(ctx, &params).await?;
                Ok(JsonValue::Array(docs.into_iter().map(JsonValue::Object).collect()))
            }
            Action::Count => {
                let params = sanitize(false, settings, raw)?;
                Ok(JsonValue::from(self.count(ctx, &params).await?))
            }
            Action::List => {
                let params = sanitize(true, settings, raw)?;
                Ok(serde_json::to_value(self.list(ctx, &params).await?)?)
            }
            Action::Create => {
                let entity = required(raw, "entity")?;
                Ok(JsonValue::Object(self.create(ctx, entity.clone()).await?))
            }
            Action::Insert => match (raw.get("entities"), raw.get("entity")) {
                (Some(JsonValue::Array(entities)), _) => {
                    let docs = self.create_many(ctx, entities.clone()).await?;
                    Ok(JsonValue::Array(docs.into_iter().map(JsonValue::Object).collect()))
                }
                (Some(_), _) => Err(EntityError::invalid_param("'entities' must be an array")),
                (None, Some(entity)) => Ok(JsonValue::Object(self.create(ctx, entity.clone()).await?)),
                (None, None) => Err(EntityError::invalid_param("missing parameter 'entities'")),
            },
            Action::Get => {
                let id = required(raw, "id")?;
                let mapping = match raw.get("mapping") {
                    None | Some(JsonValue::Null) => false,
                    Some(JsonValue::Bool(b)) => *b,
                    Some(other) => {
                        return Err(EntityError::invalid_param(format!(
                            "'mapping' must be a boolean, got {}",
                            other
                        )))
                    }
                };
                let params = sanitize(false, settings, raw)?;
                Ok(self.get(ctx, id, &params, mapping).await?.into_value())
            }
            Action::Update => {
                let id = required(raw, "id")?;
                let patch = required(raw, "patch")?;
                Ok(JsonValue::Object(self.update(ctx, id, patch).await?))
            }
            Action::Remove => {
                let id = required(raw, "id")?;
                Ok(JsonValue::Object(self.remove(ctx, id).await?))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn find(&self, ctx: &Context, params: &QueryParams) -> EntityResult<Vec<Entity>> {
        let docs = self.guarded(ctx, self.adapter.find(params)).await?;
        self.transform(ctx, docs, params).await
    }

    /// Paging never affects counts.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn count(&self, ctx: &Context, params: &QueryParams) -> EntityResult<u64> {
        let params = params.without_paging();
        self.guarded(ctx, self.adapter.count(&params)).await
    }

    /// Runs `find` and `count` concurrently; the first error wins.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn list(&self, ctx: &Context, params: &QueryParams) -> EntityResult<ListPage> {
        let page = params.page.unwrap_or(1).max(1);
        let page_size = params
            .page_size
            .unwrap_or(self.config.pagination_settings().default_page_size)
            .max(1);

        let (rows, total) = tokio::try_join!(self.find(ctx, params), self.count(ctx, params))?;
        let total_pages = total.div_ceil(page_size);

        Ok(ListPage { rows, total, page, page_size, total_pages })
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn create(&self, ctx: &Context, entity: JsonValue) -> EntityResult<Entity> {
        let entity = self.validated(entity)?;
        let created = self.guarded(ctx, self.adapter.insert(entity)).await?;
        let mut docs = self.transform(ctx, vec![created], &QueryParams::default()).await?;
        let doc = docs
            .pop()
            .ok_or_else(|| EntityError::adapter("insert returned no entity"))?;
        self.entity_changed(ChangeKind::Created, &JsonValue::Object(doc.clone()), ctx)
            .await;
        Ok(doc)
    }

    /// Validates every entity before inserting any.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name(), count = entities.len()))]
    pub async fn create_many(&self, ctx: &Context, entities: Vec<JsonValue>) -> EntityResult<Vec<Entity>> {
        let entities = entities
            .into_iter()
            .map(|e| self.validated(e))
            .collect::<EntityResult<Vec<_>>>()?;
        let created = self.guarded(ctx, self.adapter.insert_many(entities)).await?;
        let docs = self.transform(ctx, created, &QueryParams::default()).await?;
        let payload = JsonValue::Array(docs.iter().cloned().map(JsonValue::Object).collect());
        self.entity_changed(ChangeKind::Created, &payload, ctx).await;
        Ok(docs)
    }

    /// A scalar `id` returns one entity or `NotFound`. A list returns the
    /// existing entities, or with `mapping` an object keyed by their ids.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name(), mapping = mapping))]
    pub async fn get(
        &self,
        ctx: &Context,
        id: &JsonValue,
        params: &QueryParams,
        mapping: bool,
    ) -> EntityResult<Fetched> {
        let JsonValue::Array(ids) = id else {
            let doc = self.guarded(ctx, self.adapter.find_by_id(id)).await?;
            let mut docs = self.transform(ctx, vec![doc], params).await?;
            return docs
                .pop()
                .map(Fetched::One)
                .ok_or_else(|| EntityError::not_found(id.to_string()));
        };

        let docs = self.guarded(ctx, self.adapter.find_by_ids(ids)).await?;
        if !mapping {
            return Ok(Fetched::Many(self.transform(ctx, docs, params).await?));
        }

        // Keys come from the stored documents: projection may drop the id field.
        let id_field = self.config.primary_key_field();
        let keys: Vec<Option<String>> = docs
            .iter()
            .map(|d| d.get(id_field).and_then(id_key))
            .collect();
        let docs = self.transform(ctx, docs, params).await?;

        let mut mapped = Map::new();
        for (key, doc) in keys.into_iter().zip(docs) {
            if let Some(key) = key {
                mapped.insert(key, JsonValue::Object(doc));
            }
        }
        Ok(Fetched::Mapped(mapped))
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn update(&self, ctx: &Context, id: &JsonValue, patch: &JsonValue) -> EntityResult<Entity> {
        let updated = self.guarded(ctx, self.adapter.update_by_id(id, patch)).await?;
        let mut docs = self.transform(ctx, vec![updated], &QueryParams::default()).await?;
        let doc = docs
            .pop()
            .ok_or_else(|| EntityError::not_found(id.to_string()))?;
        self.entity_changed(ChangeKind::Updated, &JsonValue::Object(doc.clone()), ctx)
            .await;
        Ok(doc)
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn update_many(&self, ctx: &Context, query: &JsonValue, patch: &JsonValue) -> EntityResult<u64> {
        let count = self.guarded(ctx, self.adapter.update_many(query, patch)).await?;
        self.entity_changed(ChangeKind::Updated, &JsonValue::from(count), ctx).await;
        Ok(count)
    }

    /// Removes one entity and returns it as it was before removal.
    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn remove(&self, ctx: &Context, id: &JsonValue) -> EntityResult<Entity> {
        let existing = self.guarded(ctx, self.adapter.find_by_id(id)).await?;
        let removed = self.guarded(ctx, self.adapter.remove_by_id(id)).await?;
        if removed == 0 {
            return Err(EntityError::not_found(id.to_string()));
        }
        let mut docs = self.transform(ctx, vec![existing], &QueryParams::default()).await?;
        let doc = docs
            .pop()
            .ok_or_else(|| EntityError::not_found(id.to_string()))?;
        self.entity_changed(ChangeKind::Removed, &JsonValue::Object(doc.clone()), ctx)
            .await;
        Ok(doc)
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn remove_many(&self, ctx: &Context, query: &JsonValue) -> EntityResult<u64> {
        let count = self.guarded(ctx, self.adapter.remove_many(query)).await?;
        self.entity_changed(ChangeKind::Removed, &JsonValue::from(count), ctx).await;
        Ok(count)
    }

    #[tracing::instrument(skip_all, fields(entity = %self.config.name()))]
    pub async fn clear(&self, ctx: &Context) -> EntityResult<u64> {
        let count = self.guarded(ctx, self.adapter.clear()).await?;
        self.entity_changed(ChangeKind::Removed, &JsonValue::from(count), ctx).await;
        Ok(count)
    }

    /// Publishes the cache pattern, then runs the matching hook. Hook errors are logged only.
    pub async fn entity_changed(&self, kind: ChangeKind, doc: &JsonValue, ctx: &Context) {
        self.cache.publish(&self.config.cache_pattern());

        let Some(hooks) = &self.hooks else {
            return;
        };
        let result = match kind {
            ChangeKind::Created => hooks.entity_created(doc, ctx).await,
            ChangeKind::Updated => hooks.entity_updated(doc, ctx).await,
            ChangeKind::Removed => hooks.entity_removed(doc, ctx).await,
        };
        if let Err(e) = result {
            tracing::warn!(
                entity = %self.config.name(),
                hook = kind.hook_name(),
                error = %e,
                "lifecycle hook failed"
            );
        }
    }

    /// Populates, then projects. Projection always runs after population.
    async fn transform(&self, ctx: &Context, docs: Vec<Entity>, params: &QueryParams) -> EntityResult<Vec<Entity>> {
        let docs = self
            .populator
            .populate(ctx, docs, self.config.populate_rules(), &params.populate)
            .await?;

        let allowed = self.config.allowed_fields();
        let projection = Projection::resolve(&params.fields, allowed, allowed);
        if projection == Projection::Identity {
            return Ok(docs);
        }
        Ok(docs.iter().map(|d| projection.apply(d)).collect())
    }

    fn validated(&self, entity: JsonValue) -> EntityResult<Entity> {
        self.config
            .entity_validator()
            .validate(&entity)
            .map_err(EntityError::validation)?;
        match entity {
            JsonValue::Object(doc) => Ok(doc),
            other => Err(EntityError::validation(format!("entity must be an object, got {}", other))),
        }
    }

    async fn guarded<T, F>(&self, ctx: &Context, fut: F) -> EntityResult<T>
    where
        F: Future<Output = EntityResult<T>>,
    {
        ctx.within(fut)
            .await
            .unwrap_or_else(|| Err(EntityError::adapter("deadline exceeded")))
    }
}

fn required<'a>(raw: &'a Map<String, JsonValue>, key: &str) -> EntityResult<&'a JsonValue> {
    match raw.get(key) {
        None | Some(JsonValue::Null) => Err(EntityError::invalid_param(format!("missing parameter '{}'", key))),
        Some(value) => Ok(value),
    }
}
