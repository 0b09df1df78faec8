//! Centralized configuration (environment variables + defaults).
//!
//! `.env` is loaded by the binary before any of these are read. Malformed
//! values are reported as errors rather than replaced by defaults.

use crate::domain::model::ServiceDefinition;
use crate::domain::params::PaginationSettings;
use anyhow::{anyhow, Context as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Address the HTTP server binds to. Default `0.0.0.0:3000`.
pub fn bind_addr() -> String {
    std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
}

/// When set, services store their entities in Postgres; otherwise in memory.
pub fn database_url() -> Option<String> {
    non_empty("DATABASE_URL")
}

/// Pool size per Postgres adapter. Default 5.
pub fn database_max_connections() -> anyhow::Result<u32> {
    parse_or("DATABASE_MAX_CONNECTIONS", non_empty("DATABASE_MAX_CONNECTIONS"), 5)
}

/// Backoff between connect attempts. Default 1000 ms.
pub fn reconnect_interval() -> anyhow::Result<Duration> {
    let ms: u64 = parse_or("RECONNECT_INTERVAL_MS", non_empty("RECONNECT_INTERVAL_MS"), 1000)?;
    Ok(Duration::from_millis(ms.max(1)))
}

/// Deadline for each HTTP action call. Default 0, meaning none.
pub fn request_timeout() -> anyhow::Result<Option<Duration>> {
    let ms: u64 = parse_or("REQUEST_TIMEOUT_MS", non_empty("REQUEST_TIMEOUT_MS"), 0)?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

/// Base URL of another instance that owns the services populate rules call.
/// When unset, populate calls stay in-process.
pub fn populate_base_url() -> Option<String> {
    non_empty("POPULATE_BASE_URL")
}

/// JSON file holding an array of service definitions.
pub fn entity_services_file() -> Option<PathBuf> {
    non_empty("ENTITY_SERVICES_FILE").map(PathBuf::from)
}

/// Pagination defaults applied to services that do not set their own.
pub fn pagination_defaults() -> anyhow::Result<PaginationSettings> {
    let fallback = PaginationSettings::default();
    Ok(PaginationSettings {
        default_page_size: parse_or(
            "DEFAULT_PAGE_SIZE",
            non_empty("DEFAULT_PAGE_SIZE"),
            fallback.default_page_size,
        )?,
        max_page_size: parse_or("MAX_PAGE_SIZE", non_empty("MAX_PAGE_SIZE"), fallback.max_page_size)?,
        max_limit: parse_or("MAX_LIMIT", non_empty("MAX_LIMIT"), fallback.max_limit)?,
    })
}

pub fn load_service_definitions(path: &Path) -> anyhow::Result<Vec<ServiceDefinition>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading service definitions from {}", path.display()))?;
    parse_service_definitions(&content)
        .with_context(|| format!("parsing service definitions in {}", path.display()))
}

pub fn parse_service_definitions(content: &str) -> anyhow::Result<Vec<ServiceDefinition>> {
    let definitions: Vec<ServiceDefinition> = serde_json::from_str(content)?;
    let mut seen = std::collections::HashSet::new();
    for def in &definitions {
        if !seen.insert(def.name.as_str()) {
            return Err(anyhow!("service '{}' is defined twice", def.name));
        }
    }
    Ok(definitions)
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} must be a valid number (got '{}'): {}", name, v, e)),
    }
}
