use crate::error::EntityError;
use crate::transport::http::types::ApiResponse;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value as JsonValue;

pub fn ok_response(data: JsonValue) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::failed(message))).into_response()
}

/// Maps an entity error to its HTTP status. Server-side failures are logged.
pub fn entity_error_response(err: EntityError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::error!(error = %err, status = status.as_u16(), "action failed");
    } else {
        tracing::debug!(error = %err, status = status.as_u16(), "action rejected");
    }
    error_response(status, err.to_string())
}

pub fn json_422(err: JsonRejection, expected: &str) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        format!("Invalid JSON body: {} (expected: {})", err, expected),
    )
}
