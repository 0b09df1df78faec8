//! Storage adapter contract.
//!
//! Every backend implements [`StorageAdapter`]. The shared reference
//! semantics for query matching, search, sort and patches live in
//! [`filter`] so that backends agree on them.
//!
//! Two rules every backend must honour:
//! - a non-empty `search` disables the caller's `sort` (relevance order wins);
//! - ids missing from `find_by_ids` are omitted, never an error.

use crate::domain::params::QueryParams;
use crate::domain::path::id_key;
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value as JsonValue;

pub mod filter;
pub mod memory;
pub mod postgres;

pub use memory::MemoryAdapter;
pub use postgres::PostgresAdapter;

/// Length of generated primary keys.
pub const GENERATED_ID_LEN: usize = 16;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Opens the backend. Called by the connection manager, possibly repeatedly.
    async fn connect(&self) -> EntityResult<()> {
        Ok(())
    }

    /// Closes the backend. Must tolerate being called when not connected.
    async fn disconnect(&self) -> EntityResult<()> {
        Ok(())
    }

    /// Matching entities: query, then search, then sort (unless searching),
    /// then offset, then limit.
    async fn find(&self, params: &QueryParams) -> EntityResult<Vec<Entity>>;

    /// Number of entities matching query and search. Sort and paging are ignored.
    async fn count(&self, params: &QueryParams) -> EntityResult<u64>;

    async fn find_by_id(&self, id: &JsonValue) -> EntityResult<Entity>;

    async fn find_by_ids(&self, ids: &[JsonValue]) -> EntityResult<Vec<Entity>>;

    /// Stores one entity, assigning a primary key if it has none.
    async fn insert(&self, entity: Entity) -> EntityResult<Entity>;

    /// Stores all entities or none.
    async fn insert_many(&self, entities: Vec<Entity>) -> EntityResult<Vec<Entity>>;

    /// Applies `patch` (see [`filter::apply_patch`]) and returns the updated entity.
    async fn update_by_id(&self, id: &JsonValue, patch: &JsonValue) -> EntityResult<Entity>;

    async fn update_many(&self, query: &JsonValue, patch: &JsonValue) -> EntityResult<u64>;

    async fn remove_by_id(&self, id: &JsonValue) -> EntityResult<u64>;

    async fn remove_many(&self, query: &JsonValue) -> EntityResult<u64>;

    async fn clear(&self) -> EntityResult<u64>;
}

/// A random alphanumeric primary key.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

/// Returns the entity's primary key, assigning a generated one when the field
/// is absent or null. Non-scalar keys are rejected.
pub fn ensure_id(entity: &mut Entity, id_field: &str) -> EntityResult<String> {
    match entity.get(id_field) {
        None | Some(JsonValue::Null) => {
            let id = generate_id();
            entity.insert(id_field.to_string(), JsonValue::String(id.clone()));
            Ok(id)
        }
        Some(value) => id_key(value).ok_or_else(|| {
            EntityError::validation(format!("'{}' must be a string, number or boolean", id_field))
        }),
    }
}

/// Canonical key of an id passed by a caller.
pub(crate) fn require_id_key(id: &JsonValue) -> EntityResult<String> {
    id_key(id).ok_or_else(|| EntityError::invalid_param(format!("invalid id: {}", id)))
}
