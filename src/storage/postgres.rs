//! PostgreSQL storage backend.
//!
//! Each service gets one table of JSONB documents:
//!
//! ```sql
//! CREATE TABLE <table> (id TEXT PRIMARY KEY, seq BIGSERIAL, doc JSONB NOT NULL)
//! ```
//!
//! `seq` records insertion order; it breaks sort ties and is the relevance
//! order for searches. Queries are equality-only (`doc @> $1`); operator
//! queries are rejected. Patches are applied with the shared
//! [`filter::apply_patch`] inside a row-locking transaction.

use crate::domain::params::QueryParams;
use crate::domain::path::{id_key, FieldPath};
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use crate::storage::filter;
use crate::storage::{ensure_id, require_id_key, StorageAdapter};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::RwLock;

pub struct PostgresAdapter {
    database_url: String,
    max_connections: u32,
    table: String,
    id_field: String,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresAdapter {
    /// `table` must be a plain SQL identifier (letters, digits, `_`).
    pub fn new(
        database_url: impl Into<String>,
        table: impl Into<String>,
        id_field: impl Into<String>,
        max_connections: u32,
    ) -> EntityResult<Self> {
        let table = table.into();
        let valid = table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(EntityError::invalid_param(format!("invalid table name '{}'", table)));
        }

        Ok(Self {
            database_url: database_url.into(),
            max_connections: max_connections.max(1),
            table,
            id_field: id_field.into(),
            pool: RwLock::new(None),
        })
    }

    async fn pool(&self) -> EntityResult<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| EntityError::connection(format!("table '{}' is not connected", self.table)))
    }

    fn select_docs(&self) -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(format!("SELECT doc FROM \"{}\"", self.table))
    }

    /// Appends ` WHERE ...` for the query and the optional search.
    fn push_where(
        qb: &mut QueryBuilder<'static, Postgres>,
        query: Option<&JsonValue>,
        search: Option<(&str, &[String])>,
    ) -> EntityResult<()> {
        qb.push(" WHERE TRUE");

        let containment = containment_doc(query)?;
        if !containment.is_empty() {
            qb.push(" AND doc @> ")
                .push_bind(JsonValue::Object(containment))
                .push("::jsonb");
        }

        if let Some((term, fields)) = search {
            let pattern = format!("%{}%", escape_like(term));
            if fields.is_empty() {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM jsonb_each_text(doc) AS kv(key, value) \
                     WHERE jsonb_typeof(doc -> kv.key) IN ('string', 'number', 'boolean') \
                     AND kv.value ILIKE ",
                )
                .push_bind(pattern)
                .push(")");
            } else {
                let paths: Vec<Vec<String>> = fields
                    .iter()
                    .filter_map(|f| FieldPath::parse(f))
                    .map(|p| p.segments().to_vec())
                    .collect();
                if paths.is_empty() {
                    qb.push(" AND FALSE");
                    return Ok(());
                }
                qb.push(" AND (");
                for (i, path) in paths.into_iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    qb.push("doc #>> ")
                        .push_bind(path)
                        .push("::text[] ILIKE ")
                        .push_bind(pattern.clone());
                }
                qb.push(")");
            }
        }
        Ok(())
    }

    fn search_of(params: &QueryParams) -> Option<(&str, &[String])> {
        params
            .search_term()
            .map(|term| (term, params.search_fields.as_slice()))
    }
}

/// Equality conditions as a JSONB containment document (`{"a": {"b": 1}}` for `a.b = 1`).
fn containment_doc(query: Option<&JsonValue>) -> EntityResult<Map<String, JsonValue>> {
    let mut doc = Map::new();
    let conditions = match query {
        None | Some(JsonValue::Null) => return Ok(doc),
        Some(JsonValue::Object(map)) => map,
        Some(other) => {
            return Err(EntityError::invalid_param(format!("query must be an object, got {}", other)))
        }
    };

    for (key, condition) in conditions {
        if filter::operator_object(condition).is_some() {
            return Err(EntityError::invalid_param(format!(
                "query operators are not supported by the postgres adapter (field '{}')",
                key
            )));
        }
        let path = FieldPath::parse(key)
            .ok_or_else(|| EntityError::invalid_param(format!("invalid field path '{}'", key)))?;
        path.set(&mut doc, condition.clone());
    }
    Ok(doc)
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_entity(row: &PgRow) -> EntityResult<Entity> {
    match row.try_get::<JsonValue, _>("doc")? {
        JsonValue::Object(doc) => Ok(doc),
        other => Err(EntityError::adapter(format!("stored document is not an object: {}", other))),
    }
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    async fn connect(&self) -> EntityResult<()> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|e| EntityError::connection_with_source("failed to connect to postgres", e))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                id TEXT PRIMARY KEY,
                seq BIGSERIAL,
                doc JSONB NOT NULL
            )",
            self.table
        ))
        .execute(&pool)
        .await?;

        tracing::info!(table = %self.table, "postgres adapter connected");
        *slot = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> EntityResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            tracing::info!(table = %self.table, "postgres adapter disconnected");
        }
        Ok(())
    }

    async fn find(&self, params: &QueryParams) -> EntityResult<Vec<Entity>> {
        let pool = self.pool().await?;
        let mut qb = self.select_docs();
        Self::push_where(&mut qb, params.query.as_ref(), Self::search_of(params))?;

        qb.push(" ORDER BY ");
        if params.search_term().is_none() {
            for key in params.sort_keys() {
                let Some(path) = FieldPath::parse(&key.field) else {
                    continue;
                };
                let (direction, nulls) = if key.descending {
                    ("DESC", "NULLS LAST")
                } else {
                    ("ASC", "NULLS FIRST")
                };
                // Cross-type rank first, matching the memory adapter.
                qb.push("CASE jsonb_typeof(doc #> ")
                    .push_bind(path.segments().to_vec())
                    .push(
                        "::text[]) WHEN 'boolean' THEN 1 WHEN 'number' THEN 2 WHEN 'string' THEN 3 \
                         WHEN 'array' THEN 4 WHEN 'object' THEN 5 ELSE 0 END ",
                    )
                    .push(direction)
                    .push(", doc #> ")
                    .push_bind(path.segments().to_vec())
                    .push("::text[] ")
                    .push(direction)
                    .push(" ")
                    .push(nulls)
                    .push(", ");
            }
        }
        qb.push("seq ASC");

        if let Some(offset) = params.offset.filter(|o| *o > 0) {
            qb.push(" OFFSET ").push_bind(offset as i64);
        }
        if let Some(limit) = params.limit.filter(|l| *l > 0) {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&pool).await?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn count(&self, params: &QueryParams) -> EntityResult<u64> {
        let pool = self.pool().await?;
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) AS n FROM \"{}\"", self.table));
        Self::push_where(&mut qb, params.query.as_ref(), Self::search_of(params))?;
        let row = qb.build().fetch_one(&pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn find_by_id(&self, id: &JsonValue) -> EntityResult<Entity> {
        let key = require_id_key(id)?;
        let pool = self.pool().await?;
        let row = sqlx::query(&format!("SELECT doc FROM \"{}\" WHERE id = $1", self.table))
            .bind(&key)
            .fetch_optional(&pool)
            .await?;
        match row {
            Some(row) => row_to_entity(&row),
            None => Err(EntityError::not_found(key)),
        }
    }

    async fn find_by_ids(&self, ids: &[JsonValue]) -> EntityResult<Vec<Entity>> {
        let keys: Vec<String> = ids.iter().filter_map(id_key).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT doc FROM \"{}\" WHERE id = ANY($1) ORDER BY seq ASC",
            self.table
        ))
        .bind(keys)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn insert(&self, entity: Entity) -> EntityResult<Entity> {
        let mut inserted = self.insert_many(vec![entity]).await?;
        inserted
            .pop()
            .ok_or_else(|| EntityError::adapter("insert produced no entity"))
    }

    async fn insert_many(&self, entities: Vec<Entity>) -> EntityResult<Vec<Entity>> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let sql = format!("INSERT INTO \"{}\" (id, doc) VALUES ($1, $2)", self.table);

        let mut inserted = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key = ensure_id(&mut entity, &self.id_field)?;
            sqlx::query(&sql)
                .bind(key)
                .bind(JsonValue::Object(entity.clone()))
                .execute(&mut *tx)
                .await?;
            inserted.push(entity);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_by_id(&self, id: &JsonValue, patch: &JsonValue) -> EntityResult<Entity> {
        let key = require_id_key(id)?;
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT doc FROM \"{}\" WHERE id = $1 FOR UPDATE",
            self.table
        ))
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EntityError::not_found(key.clone()))?;

        let updated = filter::apply_patch(&row_to_entity(&row)?, patch, &self.id_field)?;
        sqlx::query(&format!("UPDATE \"{}\" SET doc = $2 WHERE id = $1", self.table))
            .bind(&key)
            .bind(JsonValue::Object(updated.clone()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn update_many(&self, query: &JsonValue, patch: &JsonValue) -> EntityResult<u64> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut qb = QueryBuilder::new(format!("SELECT id, doc FROM \"{}\"", self.table));
        Self::push_where(&mut qb, Some(query), None)?;
        qb.push(" FOR UPDATE");
        let rows = qb.build().fetch_all(&mut *tx).await?;

        let sql = format!("UPDATE \"{}\" SET doc = $2 WHERE id = $1", self.table);
        for row in &rows {
            let key: String = row.try_get("id")?;
            let updated = filter::apply_patch(&row_to_entity(row)?, patch, &self.id_field)?;
            sqlx::query(&sql)
                .bind(key)
                .bind(JsonValue::Object(updated))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn remove_by_id(&self, id: &JsonValue) -> EntityResult<u64> {
        let key = require_id_key(id)?;
        let pool = self.pool().await?;
        let result = sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = $1", self.table))
            .bind(key)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn remove_many(&self, query: &JsonValue) -> EntityResult<u64> {
        let pool = self.pool().await?;
        let mut qb = QueryBuilder::new(format!("DELETE FROM \"{}\"", self.table));
        Self::push_where(&mut qb, Some(query), None)?;
        let result = qb.build().execute(&pool).await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> EntityResult<u64> {
        let pool = self.pool().await?;
        let result = sqlx::query(&format!("DELETE FROM \"{}\"", self.table))
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }
}
