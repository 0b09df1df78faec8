//! Dotted field paths (`bio.body.height`).
//!
//! Projection, population, search and sort all address document fields
//! through this one parser so they agree on what a path means. Array index
//! syntax is not supported: a segment always names an object key.

use serde_json::{Map, Value};

/// A parsed, non-empty dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses `a.b.c`. Returns `None` for empty paths or empty segments (`a..b`, `.a`).
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Proper ancestors, nearest first: `a.b.c` yields `a.b`, then `a`.
    pub fn ancestors(&self) -> impl Iterator<Item = String> + '_ {
        (1..self.segments.len())
            .rev()
            .map(move |n| self.segments[..n].join("."))
    }

    /// Reads the value at this path. Missing keys and non-object intermediates yield `None`.
    pub fn get<'a>(&self, doc: &'a Map<String, Value>) -> Option<&'a Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = doc;
        for seg in parents {
            current = current.get(seg)?.as_object()?;
        }
        current.get(last)
    }

    /// Writes `value` at this path, creating intermediate objects. A non-object
    /// intermediate is replaced by an object.
    pub fn set(&self, doc: &mut Map<String, Value>, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };
        let mut current = doc;
        for seg in parents {
            let slot = current
                .entry(seg.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.clone(), value);
    }

    /// Removes the value at this path, returning it.
    pub fn remove(&self, doc: &mut Map<String, Value>) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = doc;
        for seg in parents {
            current = current.get_mut(seg)?.as_object_mut()?;
        }
        current.remove(last)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Reads a dotted path from a document without keeping the parsed form.
pub fn get_path<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    FieldPath::parse(path).and_then(|p| p.get(doc))
}

/// Canonical string form of a scalar id (`"5"`, `"abc"`), used as a map key
/// when ids are batched, deduplicated or returned as a mapping result.
///
/// Integral numbers share one key whatever their JSON form: `3` and `3.0` are both `"3"`.
pub fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_key(n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_key(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}
