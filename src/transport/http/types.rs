use crate::app::broker::ServiceBroker;
use crate::app::connection::{ConnectionManager, ConnectionState};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<ServiceBroker>,
    /// One manager per registered service, reported by `/health`.
    pub connections: Arc<Vec<Arc<ConnectionManager>>>,
    /// Deadline applied to every action call; `None` means no deadline.
    pub request_timeout: Option<Duration>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: JsonValue) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

/// Raw action parameters. Which keys apply depends on the action:
///
/// | action | params |
/// |--------|--------|
/// | find   | query, search, searchFields, sort, limit, offset, fields, populate |
/// | count  | query, search, searchFields |
/// | list   | page, pageSize, sort, search, searchFields, fields, populate, query |
/// | create | entity |
/// | insert | entities |
/// | get    | id (scalar or list), fields, populate, mapping |
/// | update | id, patch |
/// | remove | id |
///
/// `sort`, `fields`, `populate` and `searchFields` accept an array or a
/// comma/space separated string; numbers may be sent as strings.
#[derive(Deserialize, Serialize, Debug, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    #[schema(value_type = Option<Object>)]
    pub query: Option<JsonValue>,
    pub search: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub search_fields: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub sort: Option<JsonValue>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    #[schema(value_type = Option<Object>)]
    pub fields: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub populate: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub id: Option<JsonValue>,
    pub mapping: Option<bool>,
    #[schema(value_type = Option<Object>)]
    pub entity: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub entities: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub patch: Option<JsonValue>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct HealthReport {
    /// `ok` when every service is connected, `degraded` otherwise.
    pub status: String,
    pub services: BTreeMap<String, ConnectionState>,
}
