//! Request parameter normalization.
//!
//! Raw action parameters arrive as an untyped JSON object (numbers may be
//! strings, lists may be CSV strings). [`sanitize`] turns them into a typed
//! [`QueryParams`] and applies the pagination rules of the owning service.

use crate::error::{EntityError, EntityResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pagination limits configured per entity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSettings {
    /// Page size used by `list` when the caller gives none.
    pub default_page_size: u64,
    /// Upper bound for `pageSize`; 0 disables the clamp.
    pub max_page_size: u64,
    /// Upper bound for `limit` on every call; 0 disables the clamp.
    pub max_limit: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
            max_limit: 0,
        }
    }
}

/// One key of a multi-key sort: `-votes` sorts `votes` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (field, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        if field.is_empty() {
            return None;
        }
        Some(Self { field: field.to_string(), descending })
    }
}

/// Normalized, typed request descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Opaque filter predicate, handed to the adapter untouched.
    pub query: Option<Value>,
    pub search: Option<String>,
    pub search_fields: Vec<String>,
    pub sort: Vec<String>,
    /// `Some(0)` and `None` both mean unbounded.
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub fields: Vec<String>,
    pub populate: Vec<String>,
}

impl QueryParams {
    /// Parsed sort keys; blank entries are skipped.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        self.sort.iter().filter_map(|s| SortKey::parse(s)).collect()
    }

    /// The search term, if it is non-empty.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.is_empty())
    }

    /// Same filter, without paging. Counts must never depend on `limit`/`offset`.
    pub fn without_paging(&self) -> Self {
        Self {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }
}

/// Normalizes raw parameters.
///
/// `is_list_call` selects the page-based rules of the `list` action: page and
/// page size get defaults, the page size is clamped, and `limit`/`offset` are
/// derived from them (overwriting any given directly).
pub fn sanitize(
    is_list_call: bool,
    settings: &PaginationSettings,
    raw: &Map<String, Value>,
) -> EntityResult<QueryParams> {
    let mut params = QueryParams {
        query: raw.get("query").filter(|v| !v.is_null()).cloned(),
        search: optional_string(raw, "search")?,
        search_fields: string_list(raw, "searchFields")?,
        sort: string_list(raw, "sort")?,
        limit: optional_u64(raw, "limit")?,
        offset: optional_u64(raw, "offset")?,
        page: optional_u64(raw, "page")?,
        page_size: optional_u64(raw, "pageSize")?,
        fields: string_list(raw, "fields")?,
        populate: string_list(raw, "populate")?,
    };

    if is_list_call {
        // 0 counts as "not given", as for an absent value.
        let page = params.page.filter(|p| *p > 0).unwrap_or(1);
        let mut page_size = params
            .page_size
            .filter(|s| *s > 0)
            .unwrap_or(settings.default_page_size)
            .max(1);
        if settings.max_page_size > 0 && page_size > settings.max_page_size {
            page_size = settings.max_page_size;
        }
        params.page = Some(page);
        params.page_size = Some(page_size);
        params.limit = Some(page_size);
        params.offset = Some((page - 1).saturating_mul(page_size));
    }

    if settings.max_limit > 0 {
        if let Some(limit) = params.limit {
            if limit > settings.max_limit {
                params.limit = Some(settings.max_limit);
            }
        }
    }

    Ok(params)
}

fn optional_string(raw: &Map<String, Value>, key: &str) -> EntityResult<Option<String>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(EntityError::invalid_param(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
    }
}

/// Accepts a non-negative integer, or a string holding one.
fn optional_u64(raw: &Map<String, Value>, key: &str) -> EntityResult<Option<u64>> {
    let invalid = |v: &Value| {
        EntityError::invalid_param(format!("'{}' must be a non-negative integer, got {}", key, v))
    };
    let Some(value) = raw.get(key) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| invalid(value)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<u64>().map(Some).map_err(|_| invalid(value))
        }
        other => Err(invalid(other)),
    }
}

/// Accepts an array of strings, or a string delimited by commas and/or whitespace.
fn string_list(raw: &Map<String, Value>, key: &str) -> EntityResult<Vec<String>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(EntityError::invalid_param(format!(
                    "'{}' entries must be strings, got {}",
                    key, other
                ))),
            })
            .collect(),
        Some(other) => Err(EntityError::invalid_param(format!(
            "'{}' must be a string or an array of strings, got {}",
            key, other
        ))),
    }
}
