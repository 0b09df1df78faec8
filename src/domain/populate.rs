//! Cross-entity population.
//!
//! A populate rule turns a reference field (`author: 3`, `voters: [4, 9]`)
//! into the referenced entities. For every selected rule the populator
//! collects the distinct ids over the whole document set, resolves them with
//! one call, and splices the results back in place.

use crate::app::events::Context;
use crate::domain::path::{id_key, FieldPath};
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use crate::infra::invoker::RemoteInvoker;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Resolves ids locally instead of calling another service.
///
/// Returns a mapping from id (in [`id_key`] form) to the resolved value; ids
/// that cannot be resolved are simply left out.
#[async_trait]
pub trait PopulateHandler: Send + Sync {
    async fn resolve(
        &self,
        ids: &[JsonValue],
        rule: &PopulateRule,
        ctx: &Context,
    ) -> anyhow::Result<Map<String, JsonValue>>;
}

/// How one field is populated. Fixed once the service is built.
#[derive(Clone)]
pub enum PopulateRule {
    /// Call `action` on the owning service with `{ id, mapping: true }` plus `params`.
    Remote {
        action: String,
        params: Map<String, JsonValue>,
        /// Fields the owning service should populate in turn.
        nested: Vec<String>,
    },
    /// Resolve with a local handler.
    Local(Arc<dyn PopulateHandler>),
}

impl PopulateRule {
    pub fn remote(action: impl Into<String>) -> Self {
        Self::Remote { action: action.into(), params: Map::new(), nested: Vec::new() }
    }

    pub fn local(handler: impl PopulateHandler + 'static) -> Self {
        Self::Local(Arc::new(handler))
    }

    /// Static params sent with every remote call. Ignored for local rules.
    pub fn with_params(mut self, extra: Map<String, JsonValue>) -> Self {
        if let Self::Remote { params, .. } = &mut self {
            *params = extra;
        }
        self
    }

    /// Cascades population to `fields` of the referenced entities. Ignored for local rules.
    pub fn with_nested(mut self, fields: Vec<String>) -> Self {
        if let Self::Remote { nested, .. } = &mut self {
            *nested = fields;
        }
        self
    }
}

impl fmt::Debug for PopulateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { action, params, nested } => f
                .debug_struct("Remote")
                .field("action", action)
                .field("params", params)
                .field("nested", nested)
                .finish(),
            Self::Local(_) => f.write_str("Local(..)"),
        }
    }
}

/// Applies populate rules to document sets.
#[derive(Clone, Default)]
pub struct Populator {
    invoker: Option<Arc<dyn RemoteInvoker>>,
}

impl Populator {
    pub fn new(invoker: Option<Arc<dyn RemoteInvoker>>) -> Self {
        Self { invoker }
    }

    /// Populates the rules named in `requested`. Population is opt-in: an
    /// empty `requested` leaves the documents untouched.
    ///
    /// Rules resolve concurrently and the first failure aborts the call. On
    /// error the documents may be partially populated and must be discarded.
    #[tracing::instrument(skip_all, fields(docs = docs.len(), requested = ?requested))]
    pub async fn populate(
        &self,
        ctx: &Context,
        mut docs: Vec<Entity>,
        rules: &BTreeMap<String, PopulateRule>,
        requested: &[String],
    ) -> EntityResult<Vec<Entity>> {
        if docs.is_empty() || requested.is_empty() {
            return Ok(docs);
        }

        let mut jobs = Vec::new();
        for (field, rule) in rules.iter().filter(|(field, _)| requested.contains(field)) {
            let Some(path) = FieldPath::parse(field) else {
                continue;
            };
            let ids = collect_ids(&docs, &path);
            if ids.is_empty() {
                continue;
            }
            jobs.push(async move {
                let resolved = self.resolve(ctx, field, rule, ids).await?;
                Ok::<_, EntityError>((path, resolved))
            });
        }
        if jobs.is_empty() {
            return Ok(docs);
        }

        // Each rule owns its field, so the splices below never overlap.
        for (path, resolved) in try_join_all(jobs).await? {
            splice(&mut docs, &path, &resolved);
        }
        Ok(docs)
    }

    async fn resolve(
        &self,
        ctx: &Context,
        field: &str,
        rule: &PopulateRule,
        ids: Vec<JsonValue>,
    ) -> EntityResult<Map<String, JsonValue>> {
        tracing::debug!(field, ids = ids.len(), "resolving populate rule");

        match rule {
            PopulateRule::Local(handler) => {
                match ctx.within(handler.resolve(&ids, rule, ctx)).await {
                    None => Err(EntityError::population(field, "deadline exceeded")),
                    Some(Err(e)) => Err(EntityError::population_with_source(field, e.to_string(), e)),
                    Some(Ok(mapping)) => Ok(mapping),
                }
            }
            PopulateRule::Remote { action, params, nested } => {
                let invoker = self.invoker.as_ref().ok_or_else(|| {
                    EntityError::population(field, "no remote invoker configured")
                })?;

                let mut call_params = Map::new();
                if !nested.is_empty() {
                    call_params.insert(
                        "populate".to_string(),
                        JsonValue::Array(nested.iter().cloned().map(JsonValue::String).collect()),
                    );
                }
                call_params.extend(params.clone());
                // Generated keys win over static params.
                call_params.insert("id".to_string(), JsonValue::Array(ids));
                call_params.insert("mapping".to_string(), JsonValue::Bool(true));

                let result = match ctx.within(invoker.call(action, call_params)).await {
                    None => return Err(EntityError::population(field, format!("{} timed out", action))),
                    Some(Err(e)) => {
                        return Err(EntityError::population_with_source(
                            field,
                            format!("{} failed: {}", action, e),
                            e,
                        ))
                    }
                    Some(Ok(result)) => result,
                };

                match result {
                    JsonValue::Object(mapping) => Ok(mapping),
                    other => Err(EntityError::population(
                        field,
                        format!("{} returned {} instead of an id mapping", action, kind_of(&other)),
                    )),
                }
            }
        }
    }
}

/// Distinct, non-null ids referenced at `path`, in first-seen order.
/// Array-valued references are flattened.
fn collect_ids(docs: &[Entity], path: &FieldPath) -> Vec<JsonValue> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut take = |value: &JsonValue| {
        if let Some(key) = id_key(value) {
            if seen.insert(key) {
                ids.push(value.clone());
            }
        }
    };

    for doc in docs {
        match path.get(doc) {
            Some(JsonValue::Array(items)) => items.iter().for_each(&mut take),
            Some(value) => take(value),
            None => {}
        }
    }
    ids
}

/// Replaces references with resolved values. Unresolved ids become `null`;
/// array order and duplicates are kept.
fn splice(docs: &mut [Entity], path: &FieldPath, resolved: &Map<String, JsonValue>) {
    let lookup = |id: &JsonValue| {
        id_key(id)
            .and_then(|key| resolved.get(&key))
            .cloned()
            .unwrap_or(JsonValue::Null)
    };

    for doc in docs.iter_mut() {
        let replacement = match path.get(doc) {
            None | Some(JsonValue::Null) => continue,
            Some(JsonValue::Array(items)) => JsonValue::Array(items.iter().map(lookup).collect()),
            Some(id) => lookup(id),
        };
        path.set(doc, replacement);
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
