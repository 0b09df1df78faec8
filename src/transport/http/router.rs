use crate::app::connection::ConnectionState;
use crate::transport::http::handlers::{actions, health};
use crate::transport::http::types::{ActionParams, ApiResponse, AppState, HealthReport};
use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;

/// Served by the binary at `/api-docs/openapi.json`, next to the Swagger UI.
#[derive(OpenApi)]
#[openapi(
    paths(health::healthcheck_handler, actions::action_handler),
    components(schemas(ApiResponse, ActionParams, HealthReport, ConnectionState))
)]
pub struct ApiDoc;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .route("/api/:service/:action", post(actions::action_handler))
        .with_state(app_state)
}
