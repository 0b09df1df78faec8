//! In-memory storage backend.
//!
//! Documents are kept in insertion order, which is also the relevance order
//! used when a search term is given. Data survives `disconnect`/`connect`
//! cycles but not the process.

use crate::domain::params::QueryParams;
use crate::domain::path::id_key;
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use crate::storage::filter;
use crate::storage::{ensure_id, require_id_key, StorageAdapter};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    connected: bool,
    docs: Vec<Entity>,
}

pub struct MemoryAdapter {
    id_field: String,
    state: RwLock<MemoryState>,
}

impl MemoryAdapter {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    fn key_of(&self, doc: &Entity) -> Option<String> {
        doc.get(&self.id_field).and_then(id_key)
    }

    fn position(&self, docs: &[Entity], key: &str) -> Option<usize> {
        docs.iter().position(|d| self.key_of(d).as_deref() == Some(key))
    }

    fn select(&self, docs: &[Entity], params: &QueryParams) -> EntityResult<Vec<Entity>> {
        let mut selected = Vec::new();
        for doc in docs {
            if filter::matches(doc, params)? {
                selected.push(doc.clone());
            }
        }
        Ok(selected)
    }
}

fn not_connected() -> EntityError {
    EntityError::adapter("memory adapter is not connected")
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn connect(&self) -> EntityResult<()> {
        self.state.write().await.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> EntityResult<()> {
        self.state.write().await.connected = false;
        Ok(())
    }

    async fn find(&self, params: &QueryParams) -> EntityResult<Vec<Entity>> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(not_connected());
        }
        let mut docs = self.select(&state.docs, params)?;
        if params.search_term().is_none() {
            filter::sort_entities(&mut docs, &params.sort_keys());
        }
        Ok(filter::paginate(docs, params.offset, params.limit))
    }

    async fn count(&self, params: &QueryParams) -> EntityResult<u64> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(not_connected());
        }
        Ok(self.select(&state.docs, &params.without_paging())?.len() as u64)
    }

    async fn find_by_id(&self, id: &JsonValue) -> EntityResult<Entity> {
        let key = require_id_key(id)?;
        let state = self.state.read().await;
        if !state.connected {
            return Err(not_connected());
        }
        self.position(&state.docs, &key)
            .map(|i| state.docs[i].clone())
            .ok_or_else(|| EntityError::not_found(key))
    }

    async fn find_by_ids(&self, ids: &[JsonValue]) -> EntityResult<Vec<Entity>> {
        let keys: HashSet<String> = ids.iter().filter_map(id_key).collect();
        let state = self.state.read().await;
        if !state.connected {
            return Err(not_connected());
        }
        Ok(state
            .docs
            .iter()
            .filter(|d| self.key_of(d).is_some_and(|k| keys.contains(&k)))
            .cloned()
            .collect())
    }

    async fn insert(&self, entity: Entity) -> EntityResult<Entity> {
        let mut inserted = self.insert_many(vec![entity]).await?;
        inserted
            .pop()
            .ok_or_else(|| EntityError::adapter("insert produced no entity"))
    }

    async fn insert_many(&self, entities: Vec<Entity>) -> EntityResult<Vec<Entity>> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }

        let mut seen: HashSet<String> = state.docs.iter().filter_map(|d| self.key_of(d)).collect();
        let mut prepared = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key = ensure_id(&mut entity, &self.id_field)?;
            if !seen.insert(key.clone()) {
                return Err(EntityError::validation(format!("duplicate primary key: {}", key)));
            }
            prepared.push(entity);
        }

        state.docs.extend(prepared.iter().cloned());
        Ok(prepared)
    }

    async fn update_by_id(&self, id: &JsonValue, patch: &JsonValue) -> EntityResult<Entity> {
        let key = require_id_key(id)?;
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        let index = self
            .position(&state.docs, &key)
            .ok_or_else(|| EntityError::not_found(key))?;
        let updated = filter::apply_patch(&state.docs[index], patch, &self.id_field)?;
        state.docs[index] = updated.clone();
        Ok(updated)
    }

    async fn update_many(&self, query: &JsonValue, patch: &JsonValue) -> EntityResult<u64> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }

        // Patch every match before writing any, so a bad patch changes nothing.
        let mut updates = Vec::new();
        for (index, doc) in state.docs.iter().enumerate() {
            if filter::matches_query(doc, Some(query))? {
                updates.push((index, filter::apply_patch(doc, patch, &self.id_field)?));
            }
        }
        let count = updates.len() as u64;
        for (index, doc) in updates {
            state.docs[index] = doc;
        }
        Ok(count)
    }

    async fn remove_by_id(&self, id: &JsonValue) -> EntityResult<u64> {
        let key = require_id_key(id)?;
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        match self.position(&state.docs, &key) {
            Some(index) => {
                state.docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn remove_many(&self, query: &JsonValue) -> EntityResult<u64> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        let mut doomed = Vec::with_capacity(state.docs.len());
        for doc in &state.docs {
            doomed.push(filter::matches_query(doc, Some(query))?);
        }
        let removed = doomed.iter().filter(|d| **d).count() as u64;
        let mut flags = doomed.into_iter();
        state.docs.retain(|_| !flags.next().unwrap_or(false));
        Ok(removed)
    }

    async fn clear(&self) -> EntityResult<u64> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(not_connected());
        }
        let removed = state.docs.len() as u64;
        state.docs.clear();
        Ok(removed)
    }
}
