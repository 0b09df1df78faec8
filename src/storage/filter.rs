//! Reference document semantics shared by the storage backends.
//!
//! - Queries: an object of `path: value` equality tests or operator objects
//!   (`$eq $ne $gt $gte $lt $lte $in $nin $exists`), all of which must hold.
//! - Search: case-insensitive substring match over the search fields, or over
//!   every top-level scalar when no fields are given.
//! - Sort: stable, multi-key. Across types `null < bool < number < string < array < object`.
//! - Patches: `$set $unset $inc $push`; a plain object is a `$set`.

use crate::domain::params::{QueryParams, SortKey};
use crate::domain::path::FieldPath;
use crate::domain::Entity;
use crate::error::{EntityError, EntityResult};
use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;

/// True when `doc` satisfies both the query and the search term of `params`.
pub fn matches(doc: &Entity, params: &QueryParams) -> EntityResult<bool> {
    if !matches_query(doc, params.query.as_ref())? {
        return Ok(false);
    }
    Ok(match params.search_term() {
        Some(term) => matches_search(doc, term, &params.search_fields),
        None => true,
    })
}

pub fn matches_query(doc: &Entity, query: Option<&JsonValue>) -> EntityResult<bool> {
    let conditions = match query {
        None | Some(JsonValue::Null) => return Ok(true),
        Some(JsonValue::Object(map)) => map,
        Some(other) => {
            return Err(EntityError::invalid_param(format!("query must be an object, got {}", other)))
        }
    };

    for (key, condition) in conditions {
        let path = parse_path(key)?;
        let value = path.get(doc);
        let ok = match operator_object(condition) {
            Some(operators) => {
                let mut all = true;
                for (op, operand) in operators {
                    if !eval_operator(op, value, operand)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            None => value.is_some_and(|v| values_equal(v, condition)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// True if `condition` is a non-empty object whose keys are all operators.
pub fn operator_object(condition: &JsonValue) -> Option<&Map<String, JsonValue>> {
    match condition {
        JsonValue::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn eval_operator(op: &str, value: Option<&JsonValue>, operand: &JsonValue) -> EntityResult<bool> {
    let ordered = |accept: fn(Ordering) -> bool| match value {
        Some(v) if same_class(v, operand) => accept(compare_values(Some(v), Some(operand))),
        _ => false,
    };

    Ok(match op {
        "$eq" => value.is_some_and(|v| values_equal(v, operand)),
        "$ne" => !value.is_some_and(|v| values_equal(v, operand)),
        "$gt" => ordered(|o| o == Ordering::Greater),
        "$gte" => ordered(|o| o != Ordering::Less),
        "$lt" => ordered(|o| o == Ordering::Less),
        "$lte" => ordered(|o| o != Ordering::Greater),
        "$in" | "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                EntityError::invalid_param(format!("{} expects an array", op))
            })?;
            let found = value.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)));
            if op == "$in" {
                found
            } else {
                !found
            }
        }
        "$exists" => {
            let want = operand
                .as_bool()
                .ok_or_else(|| EntityError::invalid_param("$exists expects a boolean"))?;
            value.is_some() == want
        }
        other => return Err(EntityError::invalid_param(format!("unsupported query operator {}", other))),
    })
}

/// Case-insensitive substring search.
pub fn matches_search(doc: &Entity, term: &str, fields: &[String]) -> bool {
    let needle = term.to_lowercase();
    let hit = |value: &JsonValue| {
        scalar_text(value).is_some_and(|text| text.to_lowercase().contains(&needle))
    };

    if fields.is_empty() {
        return doc.values().any(hit);
    }
    fields
        .iter()
        .filter_map(|f| FieldPath::parse(f))
        .any(|path| path.get(doc).is_some_and(hit))
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers compare by value (`5 == 5.0`), everything else structurally.
pub fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: Option<&JsonValue>) -> u8 {
    match value {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Bool(_)) => 1,
        Some(JsonValue::Number(_)) => 2,
        Some(JsonValue::String(_)) => 3,
        Some(JsonValue::Array(_)) => 4,
        Some(JsonValue::Object(_)) => 5,
    }
}

fn same_class(a: &JsonValue, b: &JsonValue) -> bool {
    type_rank(Some(a)) == type_rank(Some(b))
}

/// Total order over optional JSON values, used for sorting.
pub fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Stable multi-key sort. Earlier keys take priority.
pub fn sort_entities(docs: &mut [Entity], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    let paths: Vec<(Option<FieldPath>, bool)> = keys
        .iter()
        .map(|k| (FieldPath::parse(&k.field), k.descending))
        .collect();

    docs.sort_by(|a, b| {
        for (path, descending) in &paths {
            let Some(path) = path else { continue };
            let ord = compare_values(path.get(a), path.get(b));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Skip-then-take. A limit of 0 or `None` is unbounded.
pub fn paginate(docs: Vec<Entity>, offset: Option<u64>, limit: Option<u64>) -> Vec<Entity> {
    let skip = offset.unwrap_or(0) as usize;
    let take = match limit {
        Some(n) if n > 0 => n as usize,
        _ => usize::MAX,
    };
    docs.into_iter().skip(skip).take(take).collect()
}

/// Returns `doc` with `patch` applied. The primary key may not change.
pub fn apply_patch(doc: &Entity, patch: &JsonValue, id_field: &str) -> EntityResult<Entity> {
    let patch = patch
        .as_object()
        .ok_or_else(|| EntityError::invalid_param("patch must be an object"))?;

    let mut updated = doc.clone();
    if patch.keys().any(|k| k.starts_with('$')) {
        for (op, operand) in patch {
            apply_operator(&mut updated, op, operand)?;
        }
    } else {
        apply_operator(&mut updated, "$set", &JsonValue::Object(patch.clone()))?;
    }

    if updated.get(id_field) != doc.get(id_field) {
        return Err(EntityError::validation(format!(
            "primary key '{}' cannot be changed",
            id_field
        )));
    }
    Ok(updated)
}

fn apply_operator(doc: &mut Entity, op: &str, operand: &JsonValue) -> EntityResult<()> {
    if op == "$unset" {
        if let JsonValue::Array(paths) = operand {
            for path in paths {
                let path = path
                    .as_str()
                    .ok_or_else(|| EntityError::invalid_param("$unset paths must be strings"))?;
                parse_path(path)?.remove(doc);
            }
            return Ok(());
        }
    }

    let entries = operand
        .as_object()
        .ok_or_else(|| EntityError::invalid_param(format!("{} expects an object", op)))?;

    for (key, value) in entries {
        let path = parse_path(key)?;
        match op {
            "$set" => path.set(doc, value.clone()),
            "$unset" => {
                path.remove(doc);
            }
            "$inc" => {
                let current = path.get(doc).cloned().unwrap_or(JsonValue::from(0));
                let sum = add_numbers(&current, value).ok_or_else(|| {
                    EntityError::invalid_param(format!("$inc on '{}' needs numeric values", key))
                })?;
                path.set(doc, sum);
            }
            "$push" => match path.get(doc).cloned() {
                None | Some(JsonValue::Null) => path.set(doc, JsonValue::Array(vec![value.clone()])),
                Some(JsonValue::Array(mut items)) => {
                    items.push(value.clone());
                    path.set(doc, JsonValue::Array(items));
                }
                Some(_) => {
                    return Err(EntityError::invalid_param(format!(
                        "$push on '{}' needs an array field",
                        key
                    )))
                }
            },
            other => {
                return Err(EntityError::invalid_param(format!("unsupported patch operator {}", other)))
            }
        }
    }
    Ok(())
}

fn add_numbers(a: &JsonValue, b: &JsonValue) -> Option<JsonValue> {
    let (JsonValue::Number(x), JsonValue::Number(y)) = (a, b) else {
        return None;
    };
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Some(JsonValue::from(sum));
        }
    }
    Number::from_f64(x.as_f64()? + y.as_f64()?).map(JsonValue::Number)
}

fn parse_path(raw: &str) -> EntityResult<FieldPath> {
    FieldPath::parse(raw).ok_or_else(|| EntityError::invalid_param(format!("invalid field path '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn query_operators() {
        let d = doc(json!({"votes": 5, "tags": "rust", "author": {"name": "Ann"}}));
        assert!(matches_query(&d, Some(&json!({"votes": 5.0}))).unwrap());
        assert!(matches_query(&d, Some(&json!({"votes": {"$gte": 5, "$lt": 10}}))).unwrap());
        assert!(!matches_query(&d, Some(&json!({"votes": {"$gt": 5}}))).unwrap());
        assert!(matches_query(&d, Some(&json!({"tags": {"$in": ["go", "rust"]}}))).unwrap());
        assert!(matches_query(&d, Some(&json!({"author.name": "Ann"}))).unwrap());
        assert!(matches_query(&d, Some(&json!({"missing": {"$exists": false}}))).unwrap());
        assert!(matches_query(&d, Some(&json!({"votes": {"$foo": 1}}))).is_err());
    }

    #[test]
    fn patch_operators() {
        let d = doc(json!({"id": "a", "votes": 1, "tags": ["x"], "old": true}));
        let patched = apply_patch(
            &d,
            &json!({"$inc": {"votes": 2}, "$push": {"tags": "y"}, "$unset": ["old"], "$set": {"meta.seen": true}}),
            "id",
        )
        .unwrap();
        assert_eq!(
            JsonValue::Object(patched),
            json!({"id": "a", "votes": 3, "tags": ["x", "y"], "meta": {"seen": true}})
        );
    }

    #[test]
    fn patch_cannot_change_primary_key() {
        let d = doc(json!({"id": "a"}));
        let err = apply_patch(&d, &json!({"id": "b"}), "id").unwrap_err();
        assert!(matches!(err, EntityError::Validation { .. }));
        assert!(apply_patch(&d, &json!({"id": "a", "x": 1}), "id").is_ok());
    }

    #[test]
    fn sort_orders_types_and_keys() {
        let mut docs = vec![
            doc(json!({"n": "b", "v": 1})),
            doc(json!({"n": "a", "v": 2})),
            doc(json!({"n": "c", "v": 2})),
            doc(json!({"v": null})),
        ];
        sort_entities(&mut docs, &[SortKey::parse("-v").unwrap(), SortKey::parse("n").unwrap()]);
        let names: Vec<_> = docs.iter().map(|d| d.get("n").cloned()).collect();
        assert_eq!(
            names,
            vec![Some(json!("a")), Some(json!("c")), Some(json!("b")), None]
        );
    }
}
