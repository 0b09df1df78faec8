use crate::app::connection::ConnectionState;
use crate::transport::http::types::{ApiResponse, AppState, HealthReport};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::collections::BTreeMap;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Every entity service is connected", body = ApiResponse),
        (status = 503, description = "At least one entity service is not connected", body = ApiResponse)
    )
)]
pub async fn healthcheck_handler(State(state): State<AppState>) -> impl IntoResponse {
    let services: BTreeMap<String, ConnectionState> = state
        .connections
        .iter()
        .map(|m| (m.name().to_string(), m.state()))
        .collect();
    let healthy = services.values().all(|s| *s == ConnectionState::Connected);

    let report = HealthReport {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        services,
    };
    let data = serde_json::to_value(&report).ok();

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse { success: true, data, error: None }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                success: false,
                data,
                error: Some("Not every entity service is connected".to_string()),
            }),
        )
    }
}
