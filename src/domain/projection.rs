//! Field authorization and projection.
//!
//! [`authorize`] intersects requested paths with a service allow-list and
//! [`filter_fields`] copies only those paths out of a document, keeping the
//! nesting. Unauthorized paths are dropped silently; this is an access
//! boundary, not input validation.
//!
//! Depth is granted, breadth is not: an allowed `a` authorizes a request for
//! `a.b`, but an allowed `a.b` only expands a request for `a` into the
//! explicitly allowed descendants of `a`.

use crate::domain::path::FieldPath;
use serde_json::{Map, Value};

/// Computes the authorized subset of `requested` against `allowed`.
///
/// An empty allow-list means no restriction. Output keeps request order;
/// expanded descendants appear in allow-list order; duplicates are removed.
pub fn authorize(requested: &[String], allowed: &[String]) -> Vec<String> {
    if allowed.is_empty() {
        return requested.to_vec();
    }

    fn push(path: &str, out: &mut Vec<String>) {
        if !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
    }

    let mut authorized: Vec<String> = Vec::with_capacity(requested.len());

    for path in requested {
        if allowed.contains(path) {
            push(path, &mut authorized);
            continue;
        }

        let parent_allowed = FieldPath::parse(path)
            .map(|p| p.is_nested() && p.ancestors().any(|a| allowed.contains(&a)))
            .unwrap_or(false);
        if parent_allowed {
            push(path, &mut authorized);
            continue;
        }

        let prefix = format!("{}.", path);
        for candidate in allowed.iter().filter(|a| a.starts_with(&prefix)) {
            push(candidate, &mut authorized);
        }
    }

    authorized
}

/// Copies the values at `fields` into a new document, preserving nesting.
///
/// Missing paths are skipped. An empty field list returns the document unchanged.
pub fn filter_fields(doc: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    if fields.is_empty() {
        return doc.clone();
    }
    pick(doc, fields)
}

fn pick(doc: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    let mut out = Map::new();
    for path in fields.iter().filter_map(|f| FieldPath::parse(f)) {
        if let Some(value) = path.get(doc) {
            path.set(&mut out, value.clone());
        }
    }
    out
}

/// The projection a service applies to a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Nothing requested and no default configured: documents pass through.
    Identity,
    /// Exactly these authorized paths. May be empty when every requested path
    /// was rejected, in which case documents project to `{}`.
    Fields(Vec<String>),
}

impl Projection {
    /// Resolves the projection for a call from the requested fields, the
    /// service default and the allow-list.
    pub fn resolve(requested: &[String], default: &[String], allowed: &[String]) -> Self {
        let wanted = if requested.is_empty() { default } else { requested };
        if wanted.is_empty() {
            return Self::Identity;
        }
        Self::Fields(authorize(wanted, allowed))
    }

    pub fn apply(&self, doc: &Map<String, Value>) -> Map<String, Value> {
        match self {
            Self::Identity => doc.clone(),
            Self::Fields(fields) => pick(doc, fields),
        }
    }
}
