use crate::app::events::Context;
use crate::transport::http::handlers::common::{entity_error_response, error_response, json_422, ok_response};
use crate::transport::http::types::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{Map, Value as JsonValue};

#[utoipa::path(
    post,
    path = "/api/{service}/{action}",
    params(
        ("service" = String, Path, description = "Entity service name (e.g. posts)"),
        ("action" = String, Path, description = "find | count | list | create | insert | get | update | remove")
    ),
    request_body = ActionParams,
    responses(
        (status = 200, description = "Action succeeded", body = ApiResponse),
        (status = 400, description = "Invalid parameter or unknown action", body = ApiResponse),
        (status = 404, description = "Unknown service or entity not found", body = ApiResponse),
        (status = 422, description = "Entity rejected by validation, or invalid JSON body", body = ApiResponse),
        (status = 500, description = "Storage failure", body = ApiResponse),
        (status = 502, description = "Population failed", body = ApiResponse),
        (status = 503, description = "Storage unreachable", body = ApiResponse)
    )
)]
pub async fn action_handler(
    State(state): State<AppState>,
    Path((service, action)): Path<(String, String)>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> impl IntoResponse {
    let service_name = service.trim();

    let Some(target) = state.broker.get(service_name).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Service '{}' is not registered", service_name),
        );
    };

    let params: Map<String, JsonValue> = match body {
        Ok(Json(JsonValue::Object(map))) => map,
        Ok(Json(JsonValue::Null)) => Map::new(),
        Ok(Json(other)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Action params must be a JSON object, got {}", other),
            )
        }
        Err(e) => return json_422(e, "{ ...action params }"),
    };

    let ctx = match state.request_timeout {
        Some(timeout) => Context::with_timeout(timeout),
        None => Context::new(),
    };

    match target.call(&action, &params, &ctx).await {
        Ok(data) => ok_response(data),
        Err(e) => entity_error_response(e),
    }
}
